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

//! RESP (REdis Serialization Protocol) reply tree and wire encoding.
//!
//! The reply tree is acyclic and arrays own their children outright; a
//! [`Reply`] only becomes shared once a command stores it behind an `Rc` for
//! fan-out to a client and, on link death, to every other callback still
//! waiting in a link's FIFO.

pub mod client_frame;
pub mod reader;

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

pub use self::client_frame::{read_client_frame, ClientFrame};
pub use self::reader::{groom_buffer, ProtocolError, RespReader};

/// Maximum accepted bulk string length, matching `PROTO_IOBUF_MAX_LEN`'s
/// sibling limit from the original reader (512 MiB).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Maximum array/bulk nesting depth. A ninth nested frame is a protocol
/// error; eight succeed.
pub const MAX_NESTING_DEPTH: usize = 8;

/// A parsed RESP value. Strings carry their raw bytes (no UTF-8 assumption);
/// `BulkString(None)` and `Array(None)` both represent RESP's nil encodings
/// (`$-1\r\n` and `*-1\r\n`).
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn nil() -> Reply {
        Reply::BulkString(None)
    }

    pub fn error<S: Into<String>>(msg: S) -> Reply {
        Reply::Error(Bytes::from(msg.into().into_bytes()))
    }

    pub fn bulk<B: Into<Bytes>>(data: B) -> Reply {
        Reply::BulkString(Some(data.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns the raw error message bytes, if this is an `Error` reply.
    pub fn as_error(&self) -> Option<&[u8]> {
        match self {
            Reply::Error(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    /// Serializes this reply to wire format, appending to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::SimpleString(s) => {
                out.put_u8(b'+');
                out.put_slice(s);
                out.put_slice(b"\r\n");
            },
            Reply::Error(s) => {
                out.put_u8(b'-');
                out.put_slice(s);
                out.put_slice(b"\r\n");
            },
            Reply::Integer(i) => {
                out.put_u8(b':');
                let mut buf = itoa::Buffer::new();
                out.put_slice(buf.format(*i).as_bytes());
                out.put_slice(b"\r\n");
            },
            Reply::BulkString(None) => out.put_slice(b"$-1\r\n"),
            Reply::BulkString(Some(s)) => {
                out.put_u8(b'$');
                let mut buf = itoa::Buffer::new();
                out.put_slice(buf.format(s.len()).as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(s);
                out.put_slice(b"\r\n");
            },
            Reply::Array(None) => out.put_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                out.put_u8(b'*');
                let mut buf = itoa::Buffer::new();
                out.put_slice(buf.format(items.len()).as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            },
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::SimpleString(s) => write!(f, "+{}", String::from_utf8_lossy(s)),
            Reply::Error(s) => write!(f, "-{}", String::from_utf8_lossy(s)),
            Reply::Integer(i) => write!(f, ":{}", i),
            Reply::BulkString(None) => write!(f, "$-1"),
            Reply::BulkString(Some(s)) => write!(f, "${}", String::from_utf8_lossy(s)),
            Reply::Array(None) => write!(f, "*-1"),
            Reply::Array(Some(items)) => write!(f, "*{}", items.len()),
        }
    }
}

/// Encodes a request as a RESP multibulk array of bulk strings, the only
/// frame shape the proxy ever writes to a backend.
pub fn encode_request(out: &mut BytesMut, args: &[Bytes]) {
    out.put_u8(b'*');
    let mut buf = itoa::Buffer::new();
    out.put_slice(buf.format(args.len()).as_bytes());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        let mut lbuf = itoa::Buffer::new();
        out.put_slice(lbuf.format(arg.len()).as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_reply_round_trip_shapes() {
        let mut out = BytesMut::new();
        Reply::ok().encode(&mut out);
        assert_eq!(&out[..], b"+OK\r\n");

        let mut out = BytesMut::new();
        Reply::Integer(-7).encode(&mut out);
        assert_eq!(&out[..], b":-7\r\n");

        let mut out = BytesMut::new();
        Reply::nil().encode(&mut out);
        assert_eq!(&out[..], b"$-1\r\n");
    }

    #[test]
    fn encodes_request_as_multibulk_of_bulkstrings() {
        let mut out = BytesMut::new();
        encode_request(&mut out, &[Bytes::from_static(b"GET"), Bytes::from_static(b"k")]);
        assert_eq!(&out[..], b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
    }
}
