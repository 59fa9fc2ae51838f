//! Flow correlation: reassembly callbacks in, per-connection pairs out.
//!
//! The first direction seen for a connection is taken as the client side.
//! Its reverse, when it opens, joins the same [`TransactionPair`]. The map is
//! only written from the reassembly thread, but cross-flow access still goes
//! through a lock so shutdown can abort every pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use httpcap_capture::StreamHandler;
use httpcap_core::bridge::{bridge, AbortHandle, BridgeWriter};
use httpcap_core::events::{ConnectionKey, DataBlock, EventPublisher, FlowKey, Timestamp};
use httpcap_protocols::Framer;
use httpcap_telemetry::{EventLogger, MetricsRecorder};

use crate::pair::TransactionPair;

/// Everything a new pair needs.
#[derive(Clone)]
pub struct PairSettings {
    pub framer: Framer,
    pub bridge_capacity: usize,
    pub append_timeout: Duration,
    pub publisher: EventPublisher,
    pub metrics: MetricsRecorder,
}

struct PairEntry {
    id: u64,
    /// Client to server direction.
    up_key: FlowKey,
    up: BridgeWriter,
    down: BridgeWriter,
    abort: AbortHandle,
}

impl PairEntry {
    fn writer(&mut self, key: &FlowKey) -> &mut BridgeWriter {
        if *key == self.up_key {
            &mut self.up
        } else {
            &mut self.down
        }
    }
}

/// Decrements the running-pair count when a pair thread exits, however it
/// exits.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct FlowCorrelator {
    pairs: Mutex<HashMap<ConnectionKey, PairEntry>>,
    next_id: AtomicU64,
    running: Arc<AtomicUsize>,
    settings: PairSettings,
}

impl FlowCorrelator {
    pub fn new(settings: PairSettings) -> Self {
        Self {
            pairs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            running: Arc::new(AtomicUsize::new(0)),
            settings,
        }
    }

    /// Connections currently tracked.
    pub fn tracked(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Pair threads still running, including ones already untracked and
    /// draining their buffered bytes.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Aborts and forgets every tracked pair. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<PairEntry> = self.pairs.lock().drain().map(|(_, e)| e).collect();
        let count = drained.iter().filter(|e| e.abort.abort()).count();
        if count > 0 {
            debug!(count, "Aborted remaining pairs");
        }
        count
    }

    fn open_pair(&self, client_key: FlowKey) -> Option<PairEntry> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let s = &self.settings;
        let abort = AbortHandle::new();
        let (up_writer, up_reader) = bridge(s.bridge_capacity, s.append_timeout, abort.clone());
        let (down_writer, down_reader) =
            bridge(s.bridge_capacity, s.append_timeout, abort.clone());

        let pair = TransactionPair::new(
            id,
            client_key.src,
            client_key.dst,
            up_reader,
            down_reader,
            abort.clone(),
            s.framer,
            s.publisher.clone(),
            s.metrics.clone(),
        );

        self.running.fetch_add(1, Ordering::AcqRel);
        let guard = RunningGuard(self.running.clone());
        let spawned = thread::Builder::new()
            .name(format!("pair-{id}"))
            .spawn(move || {
                let _guard = guard;
                pair.run()
            });
        if let Err(e) = spawned {
            // The closure (and its guard) was dropped, so the count is back.
            error!(flow = %client_key, error = %e, "Failed to spawn pair thread");
            return None;
        }

        s.metrics.pairs_opened.inc();
        Some(PairEntry {
            id,
            up_key: client_key,
            up: up_writer,
            down: down_writer,
            abort,
        })
    }

    /// Drops a pair whose stream can no longer be trusted.
    fn discard(&self, entry: PairEntry, flow: FlowKey, reason: &str) {
        if entry.abort.abort() {
            self.settings.metrics.pairs_aborted.inc();
            warn!(pair = entry.id, flow = %flow, reason, "Discarding connection");
            EventLogger::log_event(
                "pair_aborted",
                vec![
                    KeyValue::new("pair", entry.id as i64),
                    KeyValue::new("flow", flow.to_string()),
                    KeyValue::new("reason", reason.to_string()),
                ],
            );
        }
    }
}

impl StreamHandler for FlowCorrelator {
    fn stream_open(&self, key: FlowKey, _seen: Timestamp) {
        let conn = ConnectionKey::from(key);
        let mut pairs = self.pairs.lock();
        if pairs.contains_key(&conn) {
            trace!(flow = %key, "Reverse direction joined pair");
            return;
        }
        if let Some(entry) = self.open_pair(key) {
            debug!(pair = entry.id, flow = %key, "Opened pair");
            pairs.insert(conn, entry);
        }
    }

    fn stream_data(&self, key: FlowKey, data: Bytes, seen: Timestamp, is_gap: bool) {
        let conn = ConnectionKey::from(key);
        let mut pairs = self.pairs.lock();
        let Some(entry) = pairs.get_mut(&conn) else {
            return;
        };

        if entry.abort.is_aborted() {
            // The pair ended on its own; nothing will read these bytes.
            pairs.remove(&conn);
            return;
        }
        if is_gap {
            if let Some(entry) = pairs.remove(&conn) {
                self.discard(entry, key, "gap");
            }
            return;
        }
        if data.is_empty() {
            return;
        }

        if let Err(err) = entry.writer(&key).append(DataBlock::new(data, seen)) {
            if let Some(entry) = pairs.remove(&conn) {
                self.discard(entry, key, &err.to_string());
            }
        }
    }

    fn stream_close(&self, key: FlowKey) {
        let conn = ConnectionKey::from(key);
        let mut pairs = self.pairs.lock();
        let Some(entry) = pairs.get_mut(&conn) else {
            return;
        };
        entry.writer(&key).signal_complete();
        if entry.up.is_complete() && entry.down.is_complete() {
            // The pair thread keeps draining what is already buffered.
            if let Some(entry) = pairs.remove(&conn) {
                debug!(pair = entry.id, flow = %key, "Both directions closed");
            }
        }
    }
}
