//! Byte chunks as delivered by reassembly for one flow direction.

use bytes::Bytes;

pub use httpcap_capture::{ConnectionKey, FlowKey, Timestamp};

/// An ordered chunk of stream bytes plus its capture timestamp.
#[derive(Clone, Debug)]
pub struct DataBlock {
    pub data: Bytes,
    pub seen: Timestamp,
}

impl DataBlock {
    #[inline]
    pub fn new(data: Bytes, seen: Timestamp) -> Self {
        Self { data, seen }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
