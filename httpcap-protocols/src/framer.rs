//! ## httpcap-protocols::framer
//! Frames one HTTP/1.x message at a time out of a [`ByteSource`].
//!
//! The framer never looks ahead: it reads the start line, the header block up
//! to the first empty line, then exactly the body the headers announce
//! (fixed-length, chunked, or nothing). Anything that cannot be framed is a
//! [`FramingError`], which callers treat as fatal for the whole connection
//! since a byte stream cannot be rewound.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::decompress::{decode_body, BodyDecoding};
use crate::header::{ContentInfo, HeaderItem};
use crate::source::{ByteSource, StreamError};

const CRLF: &[u8] = b"\r\n";

/// Default upper bound for a single message body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Errors that stop framing on a connection.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("malformed request line: {0:?}")]
    MalformedStartLine(String),
    #[error("malformed header (line {line}): {content:?}")]
    MalformedHeader { line: usize, content: String },
    #[error("malformed Content-Length: {0:?}")]
    MalformedLength(String),
    #[error("malformed chunk size: {0:?}")]
    MalformedChunkSize(String),
    #[error("chunk data not followed by CRLF")]
    MalformedChunkTrailer,
    #[error("body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// `METHOD SP target SP HTTP/x.y`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    /// Parses a request line including its trailing CRLF.
    pub fn parse(line: &[u8]) -> Result<Self, FramingError> {
        let malformed = || FramingError::MalformedStartLine(String::from_utf8_lossy(line).into());

        let text = line
            .strip_suffix(CRLF)
            .and_then(|l| std::str::from_utf8(l).ok())
            .ok_or_else(malformed)?;

        let mut parts = text.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let method_ok = !method.is_empty() && method.bytes().all(|b| b.is_ascii_uppercase());
        let target_ok = !target.is_empty() && !target.contains(char::is_whitespace);
        if !method_ok || !target_ok || !is_http_version(version) {
            return Err(malformed());
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
        })
    }
}

/// A status line, parsed leniently: responses are never rejected on their
/// first line. Fields that cannot be recovered stay empty (code 0).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn parse(line: &[u8]) -> Self {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(&['\r', '\n'][..]);
        let mut parts = text.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        let code = parts
            .next()
            .and_then(|c| c.parse().ok())
            .unwrap_or_default();
        let reason = parts.next().unwrap_or_default().to_string();
        Self {
            version,
            code,
            reason,
        }
    }
}

fn is_http_version(v: &str) -> bool {
    match v.strip_prefix("HTTP/").map(str::as_bytes) {
        Some([major, b'.', minor]) => major.is_ascii_digit() && minor.is_ascii_digit(),
        _ => false,
    }
}

/// One framed message as it crossed the wire, body already decoded.
#[derive(Clone, Debug)]
pub struct FramedMessage {
    /// Start line and header block exactly as captured, ending in CRLF CRLF.
    pub head: Bytes,
    pub headers: Vec<HeaderItem>,
    pub content: ContentInfo,
    /// De-chunked and, where supported, decompressed body.
    pub body: Bytes,
    pub decoding: BodyDecoding,
}

impl FramedMessage {
    /// Head bytes followed by the body bytes.
    pub fn reconstruct(&self) -> Bytes {
        let mut raw = BytesMut::with_capacity(self.head.len() + self.body.len());
        raw.extend_from_slice(&self.head);
        raw.extend_from_slice(&self.body);
        raw.freeze()
    }
}

#[derive(Clone, Debug)]
pub struct FramedRequest {
    pub line: RequestLine,
    pub message: FramedMessage,
}

#[derive(Clone, Debug)]
pub struct FramedResponse {
    pub line: StatusLine,
    pub message: FramedMessage,
}

/// Stateless HTTP/1.x framer.
#[derive(Clone, Copy, Debug)]
pub struct Framer {
    max_body_size: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_SIZE)
    }
}

impl Framer {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    /// Frames the next request from `src`.
    pub fn frame_request<S: ByteSource>(&self, src: &mut S) -> Result<FramedRequest, FramingError> {
        let line_bytes = src.read_until(CRLF)?;
        let line = RequestLine::parse(&line_bytes)?;
        let message = self.frame_rest(src, line_bytes, false)?;
        Ok(FramedRequest { line, message })
    }

    /// Frames the next response from `src`. `request_method` is the method of
    /// the request this response answers; a `HEAD` response never has a body.
    pub fn frame_response<S: ByteSource>(
        &self,
        src: &mut S,
        request_method: &str,
    ) -> Result<FramedResponse, FramingError> {
        let line_bytes = src.read_until(CRLF)?;
        let line = StatusLine::parse(&line_bytes);
        let message = self.frame_rest(src, line_bytes, request_method == "HEAD")?;
        Ok(FramedResponse { line, message })
    }

    fn frame_rest<S: ByteSource>(
        &self,
        src: &mut S,
        start_line: Bytes,
        skip_body: bool,
    ) -> Result<FramedMessage, FramingError> {
        let mut head = BytesMut::from(&start_line[..]);
        let headers = read_header_block(src, &mut head)?;
        let content = ContentInfo::from_headers(&headers)?;

        let (body, decoding) = if skip_body || content.is_empty() {
            (Bytes::new(), BodyDecoding::Identity)
        } else {
            let raw = if content.chunked {
                self.read_chunked(src)?
            } else {
                self.read_fixed(src, content.length)?
            };
            decode_body(content.encoding.as_deref(), raw)
        };

        Ok(FramedMessage {
            head: head.freeze(),
            headers,
            content,
            body,
            decoding,
        })
    }

    fn read_fixed<S: ByteSource>(&self, src: &mut S, len: usize) -> Result<Bytes, FramingError> {
        if len > self.max_body_size {
            return Err(FramingError::BodyTooLarge {
                limit: self.max_body_size,
            });
        }
        Ok(src.read_exactly(len)?)
    }

    fn read_chunked<S: ByteSource>(&self, src: &mut S) -> Result<Bytes, FramingError> {
        let mut body = BytesMut::new();
        loop {
            let size_line = src.read_until(CRLF)?;
            let size = parse_chunk_size(&size_line)?;
            if body.len().saturating_add(size) > self.max_body_size {
                return Err(FramingError::BodyTooLarge {
                    limit: self.max_body_size,
                });
            }

            let data = src.read_exactly(size)?;
            body.extend_from_slice(&data);

            if src.read_exactly(CRLF.len())? != CRLF {
                return Err(FramingError::MalformedChunkTrailer);
            }
            if size == 0 {
                return Ok(body.freeze());
            }
        }
    }
}

/// Reads header lines until the empty line, appending the raw bytes to `head`.
fn read_header_block<S: ByteSource>(
    src: &mut S,
    head: &mut BytesMut,
) -> Result<Vec<HeaderItem>, FramingError> {
    let mut headers = Vec::new();
    loop {
        let line = src.read_until(CRLF)?;
        head.extend_from_slice(&line);
        if line.len() == CRLF.len() {
            return Ok(headers);
        }
        let item = HeaderItem::parse_line(&line[..line.len() - CRLF.len()], headers.len())?;
        headers.push(item);
    }
}

/// Hex chunk size; chunk extensions after ';' are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<usize, FramingError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(&['\r', '\n'][..]).trim();
    let digits = text.split_once(';').map_or(text, |(size, _)| size).trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FramingError::MalformedChunkSize(text.to_string()));
    }
    usize::from_str_radix(digits, 16).map_err(|_| FramingError::MalformedChunkSize(text.to_string()))
}
