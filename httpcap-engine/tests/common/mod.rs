#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{TimeZone, Utc};

use httpcap_capture::{Assembler, FlowKey, TcpSegment, Timestamp};
use httpcap_core::events::{EventDispatcher, EventReceiver, TransactionEvent};
use httpcap_engine::{FlowCorrelator, PairSettings};
use httpcap_protocols::Framer;
use httpcap_telemetry::MetricsRecorder;

/// Reassembly plus correlation, fed by hand.
pub struct Harness {
    pub assembler: Assembler<Arc<FlowCorrelator>>,
    pub metrics: MetricsRecorder,
    dispatcher: EventDispatcher,
    receiver: EventReceiver,
    clock: Timestamp,
}

impl Harness {
    pub fn new(max_buffered: usize) -> Self {
        Self::with_bridges(max_buffered, 32, Duration::from_secs(1))
    }

    /// Small bridges and a short append deadline make stalls show up fast.
    pub fn with_bridges(max_buffered: usize, capacity: usize, append_timeout: Duration) -> Self {
        let (dispatcher, receiver) = EventDispatcher::with_queue(64);
        let metrics = MetricsRecorder::new().unwrap();
        let correlator = Arc::new(FlowCorrelator::new(PairSettings {
            framer: Framer::default(),
            bridge_capacity: capacity,
            append_timeout,
            publisher: dispatcher.publisher(),
            metrics: metrics.clone(),
        }));
        Self {
            assembler: Assembler::new(correlator, max_buffered),
            metrics,
            dispatcher,
            receiver,
            clock: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    pub fn correlator(&self) -> &Arc<FlowCorrelator> {
        self.assembler.handler()
    }

    fn tick(&mut self) -> Timestamp {
        self.clock += chrono::Duration::milliseconds(1);
        self.clock
    }

    pub fn segment(&mut self, key: FlowKey, seq: u32, payload: &[u8]) -> TcpSegment {
        TcpSegment {
            key,
            seq,
            syn: false,
            fin: false,
            rst: false,
            payload: Bytes::copy_from_slice(payload),
            seen: self.tick(),
        }
    }

    pub fn feed(&mut self, segment: TcpSegment) {
        self.assembler.process(segment);
    }

    /// Flushes reassembly, lets every pair finish, closes delivery and
    /// returns what was published.
    pub fn finish(mut self) -> (Vec<TransactionEvent>, MetricsRecorder) {
        self.assembler.flush_all();
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.correlator().running() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.correlator().abort_all();
        self.dispatcher.shutdown();
        (self.receiver.collect(), self.metrics)
    }
}

/// One TCP connection with its own sequence counters.
pub struct Conn {
    pub client: SocketAddr,
    pub server: SocketAddr,
    client_seq: u32,
    server_seq: u32,
}

impl Conn {
    pub fn new(client: &str, server: &str) -> Self {
        Self {
            client: client.parse().unwrap(),
            server: server.parse().unwrap(),
            client_seq: 1000,
            server_seq: 5000,
        }
    }

    pub fn up(&self) -> FlowKey {
        FlowKey::new(self.client, self.server)
    }

    pub fn down(&self) -> FlowKey {
        FlowKey::new(self.server, self.client)
    }

    pub fn handshake(&mut self, h: &mut Harness) {
        let syn = TcpSegment {
            syn: true,
            ..h.segment(self.up(), self.client_seq, b"")
        };
        h.feed(syn);
        let syn_ack = TcpSegment {
            syn: true,
            ..h.segment(self.down(), self.server_seq, b"")
        };
        h.feed(syn_ack);
        self.client_seq += 1;
        self.server_seq += 1;
    }

    pub fn client_sends(&mut self, h: &mut Harness, payload: &[u8]) {
        let seg = h.segment(self.up(), self.client_seq, payload);
        self.client_seq = self.client_seq.wrapping_add(payload.len() as u32);
        h.feed(seg);
    }

    pub fn server_sends(&mut self, h: &mut Harness, payload: &[u8]) {
        let seg = h.segment(self.down(), self.server_seq, payload);
        self.server_seq = self.server_seq.wrapping_add(payload.len() as u32);
        h.feed(seg);
    }

    /// Skips `n` client bytes, as if their segment was never captured.
    pub fn client_loses(&mut self, n: u32) {
        self.client_seq = self.client_seq.wrapping_add(n);
    }

    pub fn close(&mut self, h: &mut Harness) {
        let fin = TcpSegment {
            fin: true,
            ..h.segment(self.up(), self.client_seq, b"")
        };
        h.feed(fin);
        let fin = TcpSegment {
            fin: true,
            ..h.segment(self.down(), self.server_seq, b"")
        };
        h.feed(fin);
    }
}
