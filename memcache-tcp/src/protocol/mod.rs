//! Client side of the memcached ASCII protocol.
//!
//! Only the commands the cache facade needs are modelled: `get`, `set`, `delete`, `stats` and
//! `version`. Requests are written by [`MemcacheCodec`] as text lines terminated by `\r\n`
//! (followed by a data block for `set`); responses are parsed back out of the read buffer,
//! returning `Ok(None)` until a complete response has arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Longest key memcached accepts
pub const MAX_KEY_LENGTH: usize = 250;
/// Largest data block we send or accept
pub const MAX_VALUE_LENGTH: usize = 8 * 1024 * 1024;
/// Largest status or header line we buffer while waiting for `\r\n`
const MAX_LINE_LENGTH: usize = 8 * 1024;

const CRLF: &[u8] = b"\r\n";
const END: &[u8] = b"END\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        key: String,
    },
    Set {
        key: String,
        flags: u32,
        exptime: u32,
        data: Bytes,
    },
    Delete {
        key: String,
    },
    Stats,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A hit for `get`, including the trailing `END`
    Value {
        key: String,
        flags: u32,
        data: Bytes,
    },
    /// A miss for `get`, or an empty `stats` listing
    End,
    Stats(Vec<(String, String)>),
    Stored,
    NotStored,
    Exists,
    Deleted,
    NotFound,
    Version(String),
    Error,
    ClientError(String),
    ServerError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("value of {0} bytes exceeds the 8 MiB limit")]
    ValueTooLarge(usize),

    #[error("response line exceeds 8 KiB without a terminator")]
    LineTooLong,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Check a key against memcached's rules: 1 to 250 bytes, no whitespace or control characters.
pub fn validate_key(key: &str) -> Result<(), ProtocolError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.len() > MAX_KEY_LENGTH {
        "key is longer than 250 bytes"
    } else if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        "key contains whitespace or control characters"
    } else {
        return Ok(());
    };
    Err(ProtocolError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::Set { .. } => "set",
            Request::Delete { .. } => "delete",
            Request::Stats => "stats",
            Request::Version => "version",
        }
    }

    /// Key addressed by the request, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Request::Get { key } | Request::Set { key, .. } | Request::Delete { key } => {
                Some(key.as_str())
            }
            Request::Stats | Request::Version => None,
        }
    }

    /// Reject requests the server would refuse before anything reaches the wire
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Request::Get { key } | Request::Delete { key } => validate_key(key),
            Request::Set { key, data, .. } => {
                validate_key(key)?;
                if data.len() > MAX_VALUE_LENGTH {
                    return Err(ProtocolError::ValueTooLarge(data.len()));
                }
                Ok(())
            }
            Request::Stats | Request::Version => Ok(()),
        }
    }

    /// Append the wire form of this request to `buf`
    ///
    /// Format:
    /// - GET: `get <key>\r\n`
    /// - SET: `set <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    /// - DELETE: `delete <key>\r\n`
    /// - STATS: `stats\r\n`
    /// - VERSION: `version\r\n`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        self.validate()?;

        match self {
            Request::Get { key } => {
                buf.put_slice(b"get ");
                buf.put_slice(key.as_bytes());
                buf.put_slice(CRLF);
            }
            Request::Set {
                key,
                flags,
                exptime,
                data,
            } => {
                let header = format!("set {key} {flags} {exptime} {}\r\n", data.len());
                buf.reserve(header.len() + data.len() + CRLF.len());
                buf.put_slice(header.as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Request::Delete { key } => {
                buf.put_slice(b"delete ");
                buf.put_slice(key.as_bytes());
                buf.put_slice(CRLF);
            }
            Request::Stats => buf.put_slice(b"stats\r\n"),
            Request::Version => buf.put_slice(b"version\r\n"),
        }

        Ok(())
    }
}

impl Response {
    /// Decode one complete response from the front of `src`
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while the response is still incomplete.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(line_end) = find_crlf(src, 0) else {
            return incomplete(src);
        };
        let line = line_str(&src[..line_end])?;

        if let Some(header) = line.strip_prefix("VALUE ") {
            let (key, flags, len) = parse_value_header(header)?;
            let data_start = line_end + CRLF.len();
            let data_end = data_start + len;
            let frame_end = data_end + CRLF.len() + END.len();

            if src.len() < frame_end {
                src.reserve(frame_end - src.len());
                return Ok(None);
            }
            if &src[data_end..data_end + CRLF.len()] != CRLF {
                return Err(ProtocolError::Malformed(format!(
                    "data block for {key:?} is not terminated by CRLF"
                )));
            }
            // Single-key gets only, so the value is always followed directly by END
            if &src[data_end + CRLF.len()..frame_end] != END {
                return Err(ProtocolError::Malformed(format!(
                    "expected END after the value for {key:?}"
                )));
            }

            src.advance(data_start);
            let data = src.split_to(len).freeze();
            src.advance(CRLF.len() + END.len());
            return Ok(Some(Response::Value { key, flags, data }));
        }

        if line.starts_with("STAT ") {
            return decode_stats(src);
        }

        let response = match line {
            "END" => Response::End,
            "STORED" => Response::Stored,
            "NOT_STORED" => Response::NotStored,
            "EXISTS" => Response::Exists,
            "DELETED" => Response::Deleted,
            "NOT_FOUND" => Response::NotFound,
            "ERROR" => Response::Error,
            other => {
                if let Some(version) = other.strip_prefix("VERSION ") {
                    Response::Version(version.to_string())
                } else if let Some(msg) = other.strip_prefix("CLIENT_ERROR ") {
                    Response::ClientError(msg.to_string())
                } else if let Some(msg) = other.strip_prefix("SERVER_ERROR ") {
                    Response::ServerError(msg.to_string())
                } else {
                    return Err(ProtocolError::Malformed(format!(
                        "unexpected response line {other:?}"
                    )));
                }
            }
        };

        src.advance(line_end + CRLF.len());
        Ok(Some(response))
    }
}

/// `STAT <name> <value>` lines up to and including the closing `END`
fn decode_stats(src: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
    let mut stats = Vec::new();
    let mut pos = 0;

    loop {
        let Some(line_end) = find_crlf(src, pos) else {
            if src.len() > MAX_VALUE_LENGTH {
                return Err(ProtocolError::Malformed(
                    "stats listing never terminated".to_string(),
                ));
            }
            return Ok(None);
        };
        let line = line_str(&src[pos..line_end])?;

        if line == "END" {
            src.advance(line_end + CRLF.len());
            return Ok(Some(Response::Stats(stats)));
        }

        let (name, value) = line
            .strip_prefix("STAT ")
            .and_then(|rest| rest.split_once(' '))
            .ok_or_else(|| ProtocolError::Malformed(format!("bad stats line {line:?}")))?;
        stats.push((name.to_string(), value.to_string()));
        pos = line_end + CRLF.len();
    }
}

/// Parse `<key> <flags> <bytes> [<cas unique>]`
fn parse_value_header(header: &str) -> Result<(String, u32, usize), ProtocolError> {
    let malformed = || ProtocolError::Malformed(format!("bad VALUE header {header:?}"));
    let mut parts = header.split(' ');

    let key = parts.next().filter(|k| !k.is_empty()).ok_or_else(malformed)?;
    let flags = parts
        .next()
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let len = parts
        .next()
        .and_then(|l| l.parse::<usize>().ok())
        .ok_or_else(malformed)?;
    if let Some(cas) = parts.next() {
        cas.parse::<u64>().map_err(|_| malformed())?;
    }
    if parts.next().is_some() {
        return Err(malformed());
    }
    if len > MAX_VALUE_LENGTH {
        return Err(ProtocolError::ValueTooLarge(len));
    }

    Ok((key.to_string(), flags, len))
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .map(|p| p + from)
}

fn line_str(line: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(line)
        .map_err(|_| ProtocolError::Malformed("response line is not valid UTF-8".to_string()))
}

fn incomplete(src: &BytesMut) -> Result<Option<Response>, ProtocolError> {
    if src.len() > MAX_LINE_LENGTH {
        return Err(ProtocolError::LineTooLong);
    }
    Ok(None)
}

/// Framing for a client connection: encodes [`Request`]s, decodes [`Response`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct MemcacheCodec;

impl Encoder<Request> for MemcacheCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

impl Decoder for MemcacheCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Response::decode(src)
    }
}
