//! ## httpcap-protocols::header
//! Order-preserving header items and the body-framing facts derived from them.

use crate::framer::FramingError;

/// One `name: value` header line. Duplicates are kept in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderItem {
    pub name: String,
    pub value: String,
}

impl HeaderItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parses one header line (without its CRLF). The line is split at the
    /// first ':'; the value is trimmed of surrounding spaces and tabs.
    pub fn parse_line(line: &[u8], index: usize) -> Result<Self, FramingError> {
        let text = String::from_utf8_lossy(line);
        let Some((name, value)) = text.split_once(':') else {
            return Err(FramingError::MalformedHeader {
                line: index,
                content: text.into_owned(),
            });
        };
        Ok(Self::new(name, value.trim_matches(&[' ', '\t'][..])))
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Body framing and encoding facts taken from the control headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentInfo {
    /// Declared `Content-Length`, zero when absent.
    pub length: usize,
    /// `Transfer-Encoding` is exactly `chunked`.
    pub chunked: bool,
    pub encoding: Option<String>,
    pub content_type: Option<String>,
}

impl ContentInfo {
    pub fn from_headers(headers: &[HeaderItem]) -> Result<Self, FramingError> {
        let mut info = ContentInfo::default();
        for header in headers {
            if header.is("content-length") {
                info.length = header
                    .value
                    .parse()
                    .map_err(|_| FramingError::MalformedLength(header.value.clone()))?;
            } else if header.is("transfer-encoding") && header.value == "chunked" {
                info.chunked = true;
            } else if header.is("content-encoding") {
                info.encoding = Some(header.value.clone());
            } else if header.is("content-type") {
                info.content_type = Some(header.value.clone());
            }
        }
        Ok(info)
    }

    /// No body bytes follow the header block.
    pub fn is_empty(&self) -> bool {
        self.length == 0 && !self.chunked
    }
}
