//! # httpcap Protocol Parsers
//!
//! HTTP/1.x framing over pull-style byte sources: start line, header block,
//! fixed-length and chunked bodies, content decompression, and the re-parse
//! of reconstructed messages into `http` types.

pub mod decompress;
pub mod framer;
pub mod header;
pub mod reparse;
pub mod source;

pub use decompress::{BodyDecoding, DECOMPRESSION_FAILED};
pub use framer::{
    FramedMessage, FramedRequest, FramedResponse, Framer, FramingError, RequestLine, StatusLine,
};
pub use header::{ContentInfo, HeaderItem};
pub use reparse::{reparse_request, reparse_response, strip_chunked_marker, ClientAddr, ReparseError};
pub use source::{find, ByteSource, StreamError};
