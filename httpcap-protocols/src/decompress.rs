//! Content-Encoding handling for framed bodies.
//!
//! Failures here never fail the message: the body is replaced with
//! [`DECOMPRESSION_FAILED`] and framing carries on.

use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};

/// Body substituted when a gzip/deflate payload cannot be decoded.
pub const DECOMPRESSION_FAILED: &[u8] = b"(decompression failed)";

/// What happened to a body on its way out of the framer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyDecoding {
    /// No content coding, or no body.
    Identity,
    Decoded,
    /// Decoder error; body is the sentinel.
    Failed,
    /// Unsupported coding, body left as captured.
    Passthrough,
}

pub fn decode_body(encoding: Option<&str>, body: Bytes) -> (Bytes, BodyDecoding) {
    let Some(encoding) = encoding.filter(|_| !body.is_empty()) else {
        return (body, BodyDecoding::Identity);
    };

    let decoded = if encoding.eq_ignore_ascii_case("gzip") {
        read_all(GzDecoder::new(&body[..]))
    } else if encoding.eq_ignore_ascii_case("deflate") {
        read_all(DeflateDecoder::new(&body[..]))
    } else {
        return (body, BodyDecoding::Passthrough);
    };

    match decoded {
        Ok(plain) => (Bytes::from(plain), BodyDecoding::Decoded),
        Err(_) => (Bytes::from_static(DECOMPRESSION_FAILED), BodyDecoding::Failed),
    }
}

fn read_all<R: Read>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}
