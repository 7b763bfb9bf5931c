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
use crate::resp::{Reply, MAX_BULK_LEN, MAX_NESTING_DEPTH};
use bytes::{Bytes, BytesMut};
use std::{error, fmt};

/// Idle capacity above which an emptied buffer is reallocated down rather
/// than held open, matching `PROTO_IOBUF_MAX_LEN`.
const SHRINK_THRESHOLD: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    InvalidTypeByte(u8),
    InvalidInteger,
    NegativeBulkLength(i64),
    BulkTooLarge(i64),
    NestingTooDeep,
    UnbalancedHashtag,
    /// A client request's top-level array held something other than a
    /// bulk string -- the only shape a RESP multibulk *request* may take,
    /// as opposed to a *reply*, which may nest arbitrarily.
    ExpectedMultibulkOfBulkStrings,
    /// An inline (non-`*`-prefixed) client request with no `\n` within
    /// `INLINE_MAX_SIZE` bytes.
    InlineRequestTooLarge,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidTypeByte(b) => write!(f, "Protocol error: invalid type byte '{}'", *b as char),
            ProtocolError::InvalidInteger => write!(f, "Protocol error: invalid multibulk/integer length"),
            ProtocolError::NegativeBulkLength(n) => write!(f, "Protocol error: invalid bulk length {}", n),
            ProtocolError::BulkTooLarge(n) => write!(f, "Protocol error: bulk length {} exceeds limit", n),
            ProtocolError::NestingTooDeep => write!(f, "Protocol error: array nesting too deep"),
            ProtocolError::UnbalancedHashtag => write!(f, "Protocol error: unbalanced hashtag"),
            ProtocolError::ExpectedMultibulkOfBulkStrings => {
                write!(f, "Protocol error: expected a multibulk request of bulk strings")
            },
            ProtocolError::InlineRequestTooLarge => write!(f, "Protocol error: too big inline request"),
        }
    }
}

impl error::Error for ProtocolError {}

/// A partially-parsed array frame: `remaining` elements still to be filled
/// into `items`, mirroring `bkReadTask` from the original reader.
struct Frame {
    remaining: usize,
    items: Vec<Reply>,
}

/// What the reader was in the middle of producing when data ran out.
/// Lets a short `read(2)` resume exactly where it left off instead of
/// re-scanning from the type byte.
enum Pending {
    SimpleString,
    Error,
    Integer,
    BulkLen,
    BulkBody(usize),
    ArrayLen,
}

/// An incremental RESP parser bound to one connection's read buffer.
///
/// `feed`/`parse_one` is called repeatedly as bytes arrive; the reader
/// never blocks and never loses partial progress, including in the
/// middle of a multi-megabyte bulk string split across many reads.
pub struct RespReader {
    stack: Vec<Frame>,
    pending: Option<Pending>,
}

impl Default for RespReader {
    fn default() -> Self {
        RespReader::new()
    }
}

enum Step {
    Incomplete,
    Value(Reply),
    /// A new array frame was pushed; caller should loop immediately to
    /// start parsing that frame's first element.
    Nested,
}

impl RespReader {
    pub fn new() -> RespReader {
        RespReader {
            stack: Vec::new(),
            pending: None,
        }
    }

    /// True at a frame boundary: no array frame is open and no type byte
    /// has been consumed without a completed value behind it. A caller
    /// that needs to decide *how* to parse the next frame (e.g. RESP
    /// multibulk vs. inline) may only make that decision while this is
    /// true -- once `false`, the reader has already consumed bytes
    /// belonging to the frame in progress and must be driven to
    /// completion via [`RespReader::parse_one`].
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && self.pending.is_none()
    }

    /// Attempts to parse exactly one complete top-level reply from `buf`.
    /// Returns `Ok(None)` when more bytes are needed; the reader retains
    /// whatever partial state it built up so the next call can resume.
    pub fn parse_one(&mut self, buf: &mut BytesMut) -> Result<Option<Reply>, ProtocolError> {
        loop {
            match self.parse_step(buf)? {
                Step::Incomplete => return Ok(None),
                Step::Nested => continue,
                Step::Value(mut item) => loop {
                    match self.stack.last_mut() {
                        None => return Ok(Some(item)),
                        Some(frame) => {
                            frame.items.push(item);
                            if frame.items.len() == frame.remaining {
                                let done = self.stack.pop().expect("frame present");
                                item = Reply::Array(Some(done.items));
                            } else {
                                break;
                            }
                        },
                    }
                },
            }
        }
    }

    fn parse_step(&mut self, buf: &mut BytesMut) -> Result<Step, ProtocolError> {
        if let Some(pending) = self.pending.take() {
            return self.resume(pending, buf);
        }

        if buf.is_empty() {
            return Ok(Step::Incomplete);
        }

        let type_byte = buf[0];
        match type_byte {
            b'+' => {
                buf.advance_one();
                self.resume(Pending::SimpleString, buf)
            },
            b'-' => {
                buf.advance_one();
                self.resume(Pending::Error, buf)
            },
            b':' => {
                buf.advance_one();
                self.resume(Pending::Integer, buf)
            },
            b'$' => {
                buf.advance_one();
                self.resume(Pending::BulkLen, buf)
            },
            b'*' => {
                buf.advance_one();
                self.resume(Pending::ArrayLen, buf)
            },
            other => Err(ProtocolError::InvalidTypeByte(other)),
        }
    }

    fn resume(&mut self, pending: Pending, buf: &mut BytesMut) -> Result<Step, ProtocolError> {
        match pending {
            Pending::SimpleString => match read_line(buf) {
                None => {
                    self.pending = Some(Pending::SimpleString);
                    Ok(Step::Incomplete)
                },
                Some(line) => Ok(Step::Value(Reply::SimpleString(line))),
            },
            Pending::Error => match read_line(buf) {
                None => {
                    self.pending = Some(Pending::Error);
                    Ok(Step::Incomplete)
                },
                Some(line) => Ok(Step::Value(Reply::Error(line))),
            },
            Pending::Integer => match read_line(buf) {
                None => {
                    self.pending = Some(Pending::Integer);
                    Ok(Step::Incomplete)
                },
                Some(line) => {
                    let n = parse_i64(&line)?;
                    Ok(Step::Value(Reply::Integer(n)))
                },
            },
            Pending::BulkLen => match read_line(buf) {
                None => {
                    self.pending = Some(Pending::BulkLen);
                    Ok(Step::Incomplete)
                },
                Some(line) => {
                    let len = parse_i64(&line)?;
                    if len == -1 {
                        return Ok(Step::Value(Reply::BulkString(None)));
                    }
                    if len < 0 {
                        return Err(ProtocolError::NegativeBulkLength(len));
                    }
                    if len > MAX_BULK_LEN {
                        return Err(ProtocolError::BulkTooLarge(len));
                    }
                    self.resume(Pending::BulkBody(len as usize), buf)
                },
            },
            Pending::BulkBody(len) => {
                if buf.len() < len + 2 {
                    self.pending = Some(Pending::BulkBody(len));
                    return Ok(Step::Incomplete);
                }
                let mut chunk = buf.split_to(len + 2);
                chunk.truncate(len);
                Ok(Step::Value(Reply::BulkString(Some(chunk.freeze()))))
            },
            Pending::ArrayLen => match read_line(buf) {
                None => {
                    self.pending = Some(Pending::ArrayLen);
                    Ok(Step::Incomplete)
                },
                Some(line) => {
                    let count = parse_i64(&line)?;
                    if count == -1 {
                        return Ok(Step::Value(Reply::Array(None)));
                    }
                    if count < 0 {
                        return Err(ProtocolError::InvalidInteger);
                    }
                    if count == 0 {
                        return Ok(Step::Value(Reply::Array(Some(Vec::new()))));
                    }
                    if self.stack.len() >= MAX_NESTING_DEPTH {
                        return Err(ProtocolError::NestingTooDeep);
                    }
                    self.stack.push(Frame {
                        remaining: count as usize,
                        items: Vec::with_capacity(count as usize),
                    });
                    Ok(Step::Nested)
                },
            },
        }
    }
}

fn parse_i64(line: &[u8]) -> Result<i64, ProtocolError> {
    btoi::btoi(line).map_err(|_| ProtocolError::InvalidInteger)
}

fn read_line(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = find_crlf(buf)?;
    let mut line = buf.split_to(pos + 2);
    line.truncate(pos);
    Some(line.freeze())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Small helper trait so the one-byte `advance` reads above stay terse.
trait AdvanceOne {
    fn advance_one(&mut self);
}

impl AdvanceOne for BytesMut {
    fn advance_one(&mut self) {
        let _ = self.split_to(1);
    }
}

/// Compacts `buf` per the original reader's buffer-management policy.
/// Consumed bytes are already dropped as parsing advances (each call to
/// [`RespReader::parse_one`] removes fully-parsed frames via `split_to`
/// rather than leaving them behind a cursor), so the only grooming left
/// to do here is reclaiming an oversized idle allocation once it empties
/// out -- a link that just finished a multi-megabyte bulk string
/// shouldn't keep that capacity reserved forever.
pub fn groom_buffer(buf: &mut BytesMut) {
    if buf.is_empty() && buf.capacity() > SHRINK_THRESHOLD {
        *buf = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Reply> {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(reply) = reader.parse_one(&mut buf).expect("no protocol error") {
            out.push(reply);
        }
        out
    }

    #[test]
    fn parses_simple_string() {
        let replies = parse_all(b"+OK\r\n");
        assert_eq!(replies, vec![Reply::SimpleString(Bytes::from_static(b"OK"))]);
    }

    #[test]
    fn parses_error() {
        let replies = parse_all(b"-ERR bad\r\n");
        assert_eq!(replies, vec![Reply::Error(Bytes::from_static(b"ERR bad"))]);
    }

    #[test]
    fn parses_integer_with_sign() {
        let replies = parse_all(b":-42\r\n");
        assert_eq!(replies, vec![Reply::Integer(-42)]);
    }

    #[test]
    fn parses_nil_bulk_and_nil_array() {
        let replies = parse_all(b"$-1\r\n*-1\r\n");
        assert_eq!(replies, vec![Reply::BulkString(None), Reply::Array(None)]);
    }

    #[test]
    fn zero_length_bulk_is_empty_not_nil() {
        let replies = parse_all(b"$0\r\n\r\n");
        assert_eq!(replies, vec![Reply::BulkString(Some(Bytes::new()))]);
    }

    #[test]
    fn parses_nested_multibulk() {
        let replies = parse_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert_eq!(
            replies,
            vec![Reply::Array(Some(vec![
                Reply::BulkString(Some(Bytes::from_static(b"SET"))),
                Reply::BulkString(Some(Bytes::from_static(b"k"))),
                Reply::BulkString(Some(Bytes::from_static(b"v"))),
            ]))]
        );
    }

    #[test]
    fn resumes_across_byte_splits() {
        let full = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let mut reader = RespReader::new();
        let mut buf = BytesMut::new();
        let mut result = None;
        for byte in full {
            buf.extend_from_slice(&[*byte]);
            if let Some(reply) = reader.parse_one(&mut buf).expect("no protocol error") {
                result = Some(reply);
                break;
            }
        }
        assert_eq!(
            result,
            Some(Reply::Array(Some(vec![
                Reply::BulkString(Some(Bytes::from_static(b"GET"))),
                Reply::BulkString(Some(Bytes::from_static(b"k"))),
            ])))
        );
    }

    #[test]
    fn depth_eight_succeeds_depth_nine_errors() {
        let mut ok_input = Vec::new();
        for _ in 0..8 {
            ok_input.extend_from_slice(b"*1\r\n");
        }
        ok_input.extend_from_slice(b":1\r\n");
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&ok_input[..]);
        assert!(reader.parse_one(&mut buf).expect("depth 8 parses").is_some());

        let mut too_deep = Vec::new();
        for _ in 0..9 {
            too_deep.extend_from_slice(b"*1\r\n");
        }
        too_deep.extend_from_slice(b":1\r\n");
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&too_deep[..]);
        assert_eq!(reader.parse_one(&mut buf), Err(ProtocolError::NestingTooDeep));
    }

    #[test]
    fn invalid_type_byte_is_protocol_error() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"!nope\r\n"[..]);
        assert_eq!(reader.parse_one(&mut buf), Err(ProtocolError::InvalidTypeByte(b'!')));
    }

    #[test]
    fn bulk_too_large_is_protocol_error() {
        let mut reader = RespReader::new();
        let mut buf = BytesMut::from(&b"$536870913\r\n"[..]);
        assert!(matches!(
            reader.parse_one(&mut buf),
            Err(ProtocolError::BulkTooLarge(_))
        ));
    }
}
