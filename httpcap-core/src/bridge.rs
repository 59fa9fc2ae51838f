//! Push-to-pull stream bridge.
//!
//! Reassembly pushes [`DataBlock`]s into a [`BridgeWriter`] from its single
//! notification thread; a transaction pair pulls bytes out of the matching
//! [`BridgeReader`] from its own thread. The queue between them is bounded,
//! and `append` gives up after a fixed deadline so one stalled consumer can
//! never block delivery for every other connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;

use httpcap_protocols::{find, ByteSource, StreamError};

use crate::error::BridgeError;
use crate::events::network::{DataBlock, Timestamp};

pub const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_BRIDGE_CAPACITY: usize = 32;

/// Stop signal shared by both bridges of a pair. Once fired it stays fired.
#[derive(Clone)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

struct AbortInner {
    fired: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            inner: Arc::new(AbortInner {
                fired: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Fires the signal. Returns `true` for the call that actually fired it.
    pub fn abort(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Dropping the only sender wakes every select waiting on `signal`.
        self.inner.trigger.lock().take();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates one bridge direction.
pub fn bridge(
    capacity: usize,
    append_timeout: Duration,
    abort: AbortHandle,
) -> (BridgeWriter, BridgeReader) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    (
        BridgeWriter {
            tx: Some(tx),
            abort: abort.clone(),
            append_timeout,
        },
        BridgeReader {
            rx,
            abort,
            buffered: BytesMut::new(),
            stamps: VecDeque::new(),
            message: None,
        },
    )
}

/// Producer half, owned by the flow correlator.
pub struct BridgeWriter {
    tx: Option<Sender<DataBlock>>,
    abort: AbortHandle,
    append_timeout: Duration,
}

impl BridgeWriter {
    /// Queues a block for the reader. Fails with `StreamUnhealthy` if the
    /// bridge is aborted, the reader is gone, or no room frees up before
    /// the append deadline.
    pub fn append(&self, block: DataBlock) -> Result<(), BridgeError> {
        if self.abort.is_aborted() {
            return Err(BridgeError::StreamUnhealthy);
        }
        let Some(tx) = &self.tx else {
            return Err(BridgeError::Closed);
        };
        select! {
            send(tx, block) -> res => res.map_err(|_| BridgeError::StreamUnhealthy),
            recv(self.abort.signal()) -> _ => Err(BridgeError::StreamUnhealthy),
            default(self.append_timeout) => Err(BridgeError::StreamUnhealthy),
        }
    }

    /// No more data will follow. Reads past the buffered bytes then fail
    /// with `StreamError::Ended`.
    pub fn signal_complete(&mut self) {
        self.tx = None;
    }

    pub fn is_complete(&self) -> bool {
        self.tx.is_none()
    }

    pub fn abort(&self) -> bool {
        self.abort.abort()
    }
}

#[derive(Debug)]
struct Stamp {
    len: usize,
    seen: Timestamp,
}

/// Consumer half, owned by the transaction pair thread.
pub struct BridgeReader {
    rx: Receiver<DataBlock>,
    abort: AbortHandle,
    buffered: BytesMut,
    /// Capture time of each run of bytes still in `buffered`, front first.
    stamps: VecDeque<Stamp>,
    message: Option<(Timestamp, Timestamp)>,
}

impl BridgeReader {
    /// Starts timing a new message; see [`BridgeReader::message_span`].
    pub fn begin_message(&mut self) {
        self.message = None;
    }

    /// Capture times of the first and last byte consumed since
    /// [`BridgeReader::begin_message`].
    pub fn message_span(&self) -> Option<(Timestamp, Timestamp)> {
        self.message
    }

    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    fn pull(&mut self) -> Result<(), StreamError> {
        if self.abort.is_aborted() {
            return Err(StreamError::Unhealthy);
        }
        let block = select! {
            recv(self.rx) -> block => block.map_err(|_| StreamError::Ended)?,
            recv(self.abort.signal()) -> _ => return Err(StreamError::Unhealthy),
        };
        if !block.is_empty() {
            self.stamps.push_back(Stamp {
                len: block.len(),
                seen: block.seen,
            });
            self.buffered.extend_from_slice(&block.data);
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) -> Bytes {
        let mut left = n;
        while left > 0 {
            let Some(front) = self.stamps.front_mut() else {
                break;
            };
            let seen = front.seen;
            self.message = Some(match self.message {
                Some((start, _)) => (start, seen),
                None => (seen, seen),
            });
            if front.len <= left {
                left -= front.len;
                self.stamps.pop_front();
            } else {
                front.len -= left;
                left = 0;
            }
        }
        self.buffered.split_to(n).freeze()
    }
}

impl ByteSource for BridgeReader {
    fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes, StreamError> {
        let mut scan_from = 0;
        loop {
            if let Some(pos) = find(&self.buffered[scan_from..], delimiter) {
                return Ok(self.consume(scan_from + pos + delimiter.len()));
            }
            scan_from = self
                .buffered
                .len()
                .saturating_sub(delimiter.len().saturating_sub(1));
            self.pull()?;
        }
    }

    fn read_exactly(&mut self, len: usize) -> Result<Bytes, StreamError> {
        while self.buffered.len() < len {
            self.pull()?;
        }
        Ok(self.consume(len))
    }
}
