//! Wire protocol frames and the codec that moves them over a byte stream.
//!
//! Requests go out as arrays of bulk strings; replies and pub/sub pushes come
//! back as any frame kind. The same [`RespCodec`] decodes and encodes every
//! kind, so one type serves the client connection and test servers alike.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

const CRLF: &[u8] = b"\r\n";

/// Bulk strings larger than this are treated as a corrupt stream.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Arrays nested deeper than this are treated as a corrupt stream.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Frame>>),
}

impl Frame {
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Frame::Bulk(Some(Bytes::copy_from_slice(data.as_ref())))
    }

    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// Text content of a simple or bulk string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(text) => Some(text),
            Frame::Bulk(Some(data)) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(text) if text == "OK")
    }

    pub fn into_integer(self) -> Result<i64> {
        match self {
            Frame::Integer(value) => Ok(value),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Reply of a GET-like command: a nil bulk string maps to `None`.
    pub fn into_optional_string(self) -> Result<Option<String>> {
        match self {
            Frame::Bulk(None) => Ok(None),
            Frame::Bulk(Some(data)) => String::from_utf8(data.to_vec())
                .map(Some)
                .map_err(|_| Error::Protocol("bulk reply is not valid UTF-8".to_string())),
            Frame::Simple(text) => Ok(Some(text)),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(text) => write_line(dst, b'+', text.as_bytes()),
            Frame::Error(text) => write_line(dst, b'-', text.as_bytes()),
            Frame::Integer(value) => write_line(dst, b':', value.to_string().as_bytes()),
            Frame::Bulk(None) => write_line(dst, b'$', b"-1"),
            Frame::Bulk(Some(data)) => {
                write_line(dst, b'$', data.len().to_string().as_bytes());
                dst.put_slice(data);
                dst.put_slice(CRLF);
            }
            Frame::Array(None) => write_line(dst, b'*', b"-1"),
            Frame::Array(Some(items)) => {
                write_line(dst, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }
}

fn unexpected(expected: &str, frame: &Frame) -> Error {
    Error::Protocol(format!("expected {expected} reply, got {frame:?}"))
}

fn write_line(dst: &mut BytesMut, kind: u8, line: &[u8]) {
    dst.reserve(line.len() + 3);
    dst.put_u8(kind);
    dst.put_slice(line);
    dst.put_slice(CRLF);
}

/// A request: command name followed by its arguments, all sent as bulk strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_uppercase()
    }
}

impl From<Command> for Frame {
    fn from(command: Command) -> Self {
        Frame::Array(Some(
            command
                .args
                .into_iter()
                .map(|arg| Frame::Bulk(Some(arg)))
                .collect(),
        ))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // Parse against a cursor and only consume once a whole frame is buffered.
        let mut cursor = 0;
        match parse_frame(src, &mut cursor, 0)? {
            Some(frame) => {
                src.advance(cursor);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        frame.encode(dst);
        Ok(())
    }
}

fn parse_frame(buf: &[u8], cursor: &mut usize, depth: usize) -> Result<Option<Frame>> {
    let Some(&kind) = buf.get(*cursor) else {
        return Ok(None);
    };
    *cursor += 1;
    let Some(line) = read_line(buf, cursor) else {
        return Ok(None);
    };

    match kind {
        b'+' => Ok(Some(Frame::Simple(text(line)?))),
        b'-' => Ok(Some(Frame::Error(text(line)?))),
        b':' => Ok(Some(Frame::Integer(integer(line)?))),
        b'$' => {
            let Some(len) = length(line)? else {
                return Ok(Some(Frame::Bulk(None)));
            };
            if len > MAX_BULK_LEN {
                return Err(Error::Protocol(format!("bulk string of {len} bytes")));
            }
            let end = *cursor + len;
            if buf.len() < end + CRLF.len() {
                return Ok(None);
            }
            if &buf[end..end + CRLF.len()] != CRLF {
                return Err(Error::Protocol(
                    "bulk string is missing its terminator".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&buf[*cursor..end]);
            *cursor = end + CRLF.len();
            Ok(Some(Frame::Bulk(Some(data))))
        }
        b'*' => {
            let Some(len) = length(line)? else {
                return Ok(Some(Frame::Array(None)));
            };
            if len > 0 && depth >= MAX_DEPTH {
                return Err(Error::Protocol(format!(
                    "arrays nested deeper than {MAX_DEPTH} levels"
                )));
            }
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                match parse_frame(buf, cursor, depth + 1)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(Frame::Array(Some(items))))
        }
        other => Err(Error::Protocol(format!(
            "unexpected frame type byte 0x{other:02x}"
        ))),
    }
}

fn read_line<'a>(buf: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let rest = buf.get(*cursor..)?;
    let end = rest.windows(CRLF.len()).position(|window| window == CRLF)?;
    *cursor += end + CRLF.len();
    Some(&rest[..end])
}

fn text(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec())
        .map_err(|_| Error::Protocol("status line is not valid UTF-8".to_string()))
}

fn integer(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| {
            Error::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

/// Length prefix of a bulk string or array; `-1` means nil.
fn length(line: &[u8]) -> Result<Option<usize>> {
    match integer(line)? {
        -1 => Ok(None),
        len if len < 0 => Err(Error::Protocol(format!("negative length {len}"))),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| Error::Protocol(format!("length {len} out of range"))),
    }
}
