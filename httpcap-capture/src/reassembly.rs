//! Minimal per-direction TCP reassembly.
//!
//! Each [`FlowKey`] direction is tracked on its own. Payload is handed to a
//! [`StreamHandler`] strictly in sequence order; retransmitted bytes are
//! trimmed and out-of-order segments are held back. When too many segments
//! are held back, or a stream goes idle past the flush threshold, delivery
//! skips ahead to the earliest held segment and flags that chunk as a gap.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::packet::{FlowKey, TcpSegment, Timestamp};

/// Receiver of reassembled stream data.
pub trait StreamHandler {
    /// A new direction was seen (SYN or first payload).
    fn stream_open(&self, key: FlowKey, seen: Timestamp);
    /// In-order payload. `is_gap` is set when bytes before `data` were lost.
    fn stream_data(&self, key: FlowKey, data: Bytes, seen: Timestamp, is_gap: bool);
    /// The direction ended (FIN, RST, or flushed as idle).
    fn stream_close(&self, key: FlowKey);
}

impl<T: StreamHandler + ?Sized> StreamHandler for Arc<T> {
    fn stream_open(&self, key: FlowKey, seen: Timestamp) {
        (**self).stream_open(key, seen)
    }

    fn stream_data(&self, key: FlowKey, data: Bytes, seen: Timestamp, is_gap: bool) {
        (**self).stream_data(key, data, seen, is_gap)
    }

    fn stream_close(&self, key: FlowKey) {
        (**self).stream_close(key)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Streams whose missing bytes were skipped over.
    pub skipped: usize,
    /// Streams closed by the flush.
    pub closed: usize,
}

#[derive(Debug)]
struct Pending {
    seq: u32,
    payload: Bytes,
    fin: bool,
    seen: Timestamp,
}

#[derive(Debug)]
struct Chunk {
    data: Bytes,
    seen: Timestamp,
    is_gap: bool,
}

#[derive(Debug)]
struct HalfStream {
    next_seq: u32,
    pending: Vec<Pending>,
    last_seen: Timestamp,
    gap: bool,
    finished: bool,
}

impl HalfStream {
    fn new(next_seq: u32, seen: Timestamp) -> Self {
        Self {
            next_seq,
            pending: Vec::new(),
            last_seen: seen,
            gap: false,
            finished: false,
        }
    }

    fn push(&mut self, seg: Pending, max_buffered: usize, out: &mut Vec<Chunk>) {
        if seq_diff(seg.seq, self.next_seq) > 0 {
            self.pending.push(seg);
        } else {
            self.take(seg, out);
        }
        self.drain(out);

        while !self.finished && self.pending.len() > max_buffered {
            self.skip_gap();
            self.drain(out);
        }
    }

    /// Accepts a segment starting at or before `next_seq`.
    fn take(&mut self, seg: Pending, out: &mut Vec<Chunk>) {
        let end = seq_add(seg.seq, seg.payload.len());
        let new_bytes = seq_diff(end, self.next_seq);
        if new_bytes > 0 {
            let overlap = seg.payload.len() - new_bytes as usize;
            out.push(Chunk {
                data: seg.payload.slice(overlap..),
                seen: seg.seen,
                is_gap: std::mem::take(&mut self.gap),
            });
            self.next_seq = end;
        }
        if seg.fin && new_bytes >= 0 {
            self.finished = true;
        }
    }

    fn drain(&mut self, out: &mut Vec<Chunk>) {
        while !self.finished {
            let Some(idx) = self.earliest() else { break };
            if seq_diff(self.pending[idx].seq, self.next_seq) > 0 {
                break;
            }
            let seg = self.pending.swap_remove(idx);
            self.take(seg, out);
        }
    }

    /// Jumps over the missing range to the earliest held-back segment.
    fn skip_gap(&mut self) -> bool {
        let Some(idx) = self.earliest() else {
            return false;
        };
        self.next_seq = self.pending[idx].seq;
        self.gap = true;
        true
    }

    fn earliest(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| seq_diff(p.seq, self.next_seq))
            .map(|(idx, _)| idx)
    }
}

pub struct Assembler<H: StreamHandler> {
    handler: H,
    streams: HashMap<FlowKey, HalfStream>,
    max_buffered: usize,
}

impl<H: StreamHandler> Assembler<H> {
    pub fn new(handler: H, max_buffered: usize) -> Self {
        Self {
            handler,
            streams: HashMap::new(),
            max_buffered: max_buffered.max(1),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn process(&mut self, seg: TcpSegment) {
        let TcpSegment {
            key,
            seq,
            syn,
            fin,
            rst,
            payload,
            seen,
        } = seg;
        let data_seq = if syn { seq.wrapping_add(1) } else { seq };

        if !self.streams.contains_key(&key) {
            // Bare ACKs and teardown of unknown flows must not open streams.
            if !syn && payload.is_empty() {
                return;
            }
            trace!(flow = %key, syn, "Opening stream");
            self.handler.stream_open(key, seen);
            self.streams.insert(key, HalfStream::new(data_seq, seen));
        }

        if rst {
            self.close(key);
            return;
        }

        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        stream.last_seen = stream.last_seen.max(seen);
        if payload.is_empty() && !fin {
            return;
        }

        let mut out = Vec::new();
        stream.push(
            Pending {
                seq: data_seq,
                payload,
                fin,
                seen,
            },
            self.max_buffered,
            &mut out,
        );
        let finished = stream.finished;

        self.deliver(key, out);
        if finished {
            self.close(key);
        }
    }

    /// Skips missing data on streams idle since before `threshold` and
    /// closes them.
    pub fn flush_older_than(&mut self, threshold: Timestamp) -> FlushStats {
        let idle: Vec<FlowKey> = self
            .streams
            .iter()
            .filter(|(_, s)| s.last_seen < threshold)
            .map(|(k, _)| *k)
            .collect();
        self.flush_keys(idle)
    }

    /// Flushes and closes every stream.
    pub fn flush_all(&mut self) -> FlushStats {
        let all: Vec<FlowKey> = self.streams.keys().copied().collect();
        self.flush_keys(all)
    }

    fn flush_keys(&mut self, keys: Vec<FlowKey>) -> FlushStats {
        let mut stats = FlushStats::default();
        for key in keys {
            let Some(mut stream) = self.streams.remove(&key) else {
                continue;
            };
            let mut out = Vec::new();
            stream.drain(&mut out);
            while !stream.finished && stream.skip_gap() {
                stats.skipped += 1;
                stream.drain(&mut out);
            }
            self.deliver(key, out);
            self.handler.stream_close(key);
            stats.closed += 1;
        }
        if stats.closed > 0 {
            debug!(
                closed = stats.closed,
                skipped = stats.skipped,
                remaining = self.streams.len(),
                "Flushed streams"
            );
        }
        stats
    }

    fn deliver(&self, key: FlowKey, chunks: Vec<Chunk>) {
        for chunk in chunks {
            if chunk.is_gap {
                trace!(flow = %key, "Delivering after gap");
            }
            self.handler
                .stream_data(key, chunk.data, chunk.seen, chunk.is_gap);
        }
    }

    fn close(&mut self, key: FlowKey) {
        if self.streams.remove(&key).is_some() {
            trace!(flow = %key, "Closing stream");
            self.handler.stream_close(key);
        }
    }
}

fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

fn seq_add(a: u32, n: usize) -> u32 {
    a.wrapping_add(n as u32)
}
