//! Pull interface the framer reads from.

use bytes::Bytes;
use thiserror::Error;

/// Why a source could not hand out the requested bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream ended before the requested data was available")]
    Ended,
    #[error("stream aborted as unhealthy")]
    Unhealthy,
}

/// A blocking, in-order byte supply for one direction of a connection.
pub trait ByteSource {
    /// Returns everything up to and including the first `delimiter`.
    fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes, StreamError>;

    /// Returns exactly `len` bytes.
    fn read_exactly(&mut self, len: usize) -> Result<Bytes, StreamError>;
}

/// A complete in-memory buffer; running out of data means the stream ended.
impl ByteSource for Bytes {
    fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes, StreamError> {
        match find(self, delimiter) {
            Some(pos) => Ok(self.split_to(pos + delimiter.len())),
            None => Err(StreamError::Ended),
        }
    }

    fn read_exactly(&mut self, len: usize) -> Result<Bytes, StreamError> {
        if self.len() < len {
            return Err(StreamError::Ended);
        }
        Ok(self.split_to(len))
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
