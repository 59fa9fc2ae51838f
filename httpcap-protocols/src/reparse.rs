//! Re-parse of reconstructed messages into `http` crate types.
//!
//! The framer has already decided where the message ends; this step only
//! turns `head + body` into a [`http::Request`] / [`http::Response`] for
//! application code. Its failures are reported, never fatal.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use http::{Request, Response, Version};
use thiserror::Error;

use crate::source::find;

const CRLF: &[u8] = b"\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";
const MAX_HEADERS: usize = 128;

/// Request extension carrying the client side of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

#[derive(Debug, Error)]
pub enum ReparseError {
    #[error("incomplete message head")]
    Incomplete,
    #[error("invalid message head: {0}")]
    Syntax(#[from] httparse::Error),
    #[error("invalid message: {0}")]
    Http(#[from] http::Error),
    #[error("message head has no {0}")]
    Missing(&'static str),
}

pub fn reparse_request(raw: &[u8]) -> Result<Request<Bytes>, ReparseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(body_offset) = req.parse(raw)? else {
        return Err(ReparseError::Incomplete);
    };

    let mut builder = Request::builder()
        .method(req.method.ok_or(ReparseError::Missing("method"))?)
        .uri(req.path.ok_or(ReparseError::Missing("target"))?)
        .version(version(req.version));
    for h in req.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    Ok(builder.body(Bytes::copy_from_slice(&raw[body_offset..]))?)
}

pub fn reparse_response(raw: &[u8]) -> Result<Response<Bytes>, ReparseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);
    let httparse::Status::Complete(body_offset) = res.parse(raw)? else {
        return Err(ReparseError::Incomplete);
    };

    let mut builder = Response::builder()
        .status(res.code.ok_or(ReparseError::Missing("status code"))?)
        .version(version(res.version));
    for h in res.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    Ok(builder.body(Bytes::copy_from_slice(&raw[body_offset..]))?)
}

fn version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

/// Drops `Transfer-Encoding: chunked` header lines from a reconstructed
/// message whose body has already been de-chunked.
pub fn strip_chunked_marker(raw: &[u8]) -> Bytes {
    let Some(head_end) = find(raw, HEAD_END) else {
        return Bytes::copy_from_slice(raw);
    };

    let mut out = BytesMut::with_capacity(raw.len());
    let mut rest = &raw[..head_end + CRLF.len()];
    while let Some(pos) = find(rest, CRLF) {
        let (line, tail) = rest.split_at(pos + CRLF.len());
        if !is_chunked_marker(&line[..pos]) {
            out.extend_from_slice(line);
        }
        rest = tail;
    }
    out.extend_from_slice(&raw[head_end + CRLF.len()..]);
    out.freeze()
}

fn is_chunked_marker(line: &[u8]) -> bool {
    let text = String::from_utf8_lossy(line);
    text.split_once(':').is_some_and(|(name, value)| {
        name.trim().eq_ignore_ascii_case("transfer-encoding") && value.trim() == "chunked"
    })
}
