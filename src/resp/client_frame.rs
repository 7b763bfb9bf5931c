// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Client-facing frame reader. A client request is either a RESP
//! multibulk array of bulk strings -- the shape every routed command
//! arrives in -- or an inline, whitespace-separated command line, which
//! the dispatcher only accepts for no-route local commands.
use crate::resp::reader::{ProtocolError, RespReader};
use crate::resp::Reply;
use bytes::{Bytes, BytesMut};

/// Matches Redis's own `PROTO_INLINE_MAX_SIZE`: an inline request with no
/// terminator within this many bytes is a protocol error rather than an
/// unbounded wait for more input.
const INLINE_MAX_SIZE: usize = 64 * 1024;

/// One parsed client request: its argv, and whether it arrived as an
/// inline command line rather than RESP multibulk.
pub struct ClientFrame {
    pub argv: Vec<Bytes>,
    pub inline: bool,
}

/// Reads exactly one client frame from `buf`: `*`-prefixed input goes
/// through the RESP reader and is unpacked into bulk-string argv,
/// anything else is parsed as an inline command line. Returns `Ok(None)`
/// when `buf` holds an incomplete frame.
///
/// The inline-vs-multibulk choice is only made at a frame boundary
/// (`reader.is_idle()`). A multibulk frame split across reads leaves the
/// leading `*` already consumed and `reader`'s parse state mid-frame;
/// re-inspecting `buf[0]` at that point would see whatever byte the
/// partial frame left behind (e.g. a bulk string's body) and misroute it
/// to `read_inline`, corrupting the shared reader for every frame after
/// it. Once a multibulk frame has started, it is driven to completion
/// via `parse_one` regardless of what `buf` currently holds.
pub fn read_client_frame(reader: &mut RespReader, buf: &mut BytesMut) -> Result<Option<ClientFrame>, ProtocolError> {
    if reader.is_idle() {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] != b'*' {
            return read_inline(buf);
        }
    }
    match reader.parse_one(buf)? {
        None => Ok(None),
        Some(Reply::Array(Some(items))) => {
            let argv = items
                .into_iter()
                .map(|item| match item {
                    Reply::BulkString(Some(b)) => Ok(b),
                    _ => Err(ProtocolError::ExpectedMultibulkOfBulkStrings),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(ClientFrame { argv, inline: false }))
        },
        Some(Reply::Array(None)) => Ok(Some(ClientFrame { argv: Vec::new(), inline: false })),
        Some(_) => Err(ProtocolError::ExpectedMultibulkOfBulkStrings),
    }
}

fn read_inline(buf: &mut BytesMut) -> Result<Option<ClientFrame>, ProtocolError> {
    let newline = buf.iter().position(|&b| b == b'\n');
    let end = match newline {
        Some(pos) => pos,
        None => {
            if buf.len() > INLINE_MAX_SIZE {
                return Err(ProtocolError::InlineRequestTooLarge);
            }
            return Ok(None);
        },
    };
    let mut line = buf.split_to(end + 1);
    line.truncate(end);
    if line.last() == Some(&b'\r') {
        let new_len = line.len() - 1;
        line.truncate(new_len);
    }
    let argv = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|part| !part.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(Some(ClientFrame { argv, inline: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::RespReader;

    #[test]
    fn parses_multibulk_as_non_inline() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]);
        let frame = read_client_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert!(!frame.inline);
        assert_eq!(frame.argv, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")]);
    }

    #[test]
    fn parses_inline_command_line() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"PING hello\r\n"[..]);
        let frame = read_client_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert!(frame.inline);
        assert_eq!(frame.argv, vec![Bytes::from_static(b"PING"), Bytes::from_static(b"hello")]);
    }

    #[test]
    fn incomplete_inline_line_waits_for_more_bytes() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"PING"[..]);
        assert!(read_client_frame(&mut reader, &mut buf).unwrap().is_none());
    }

    #[test]
    fn incomplete_multibulk_waits_for_more_bytes() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n"[..]);
        assert!(read_client_frame(&mut reader, &mut buf).unwrap().is_none());
    }

    /// A multibulk frame delivered one byte per call (the shape of an
    /// ordinary TCP segmentation split) must still be recognized as
    /// multibulk all the way through -- `buf[0]` stops being `*` the
    /// moment the reader consumes it, and must not cause a later call to
    /// mis-route the rest of the frame to `read_inline`.
    #[test]
    fn multibulk_fed_one_byte_at_a_time_stays_multibulk() {
        let mut reader = RespReader::new();
        let full = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let mut buf = BytesMut::new();
        let mut frame = None;
        for byte in full {
            buf.extend_from_slice(&[*byte]);
            if let Some(f) = read_client_frame(&mut reader, &mut buf).unwrap() {
                frame = Some(f);
                break;
            }
        }
        let frame = frame.expect("frame completes once every byte has arrived");
        assert!(!frame.inline);
        assert_eq!(frame.argv, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")]);
    }

    #[test]
    fn rejects_multibulk_with_non_bulkstring_elements() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"*1\r\n:5\r\n"[..]);
        assert_eq!(read_client_frame(&mut reader, &mut buf), Err(ProtocolError::ExpectedMultibulkOfBulkStrings));
    }

    #[test]
    fn inline_line_collapses_repeated_whitespace() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"PING   hello\r\n"[..]);
        let frame = read_client_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert_eq!(frame.argv, vec![Bytes::from_static(b"PING"), Bytes::from_static(b"hello")]);
    }
}
