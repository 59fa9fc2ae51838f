//! One connection's request/response pairing loop.
//!
//! A [`TransactionPair`] runs on its own thread and owns the reading side of
//! both bridges. Request *n* is framed from the client stream, then response
//! *n* from the server stream, then the transaction is published; nothing is
//! read ahead. Any framing failure ends the loop and fires the pair's abort
//! signal, which stops both bridges. Other connections never notice.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, trace, warn};

use httpcap_core::bridge::{AbortHandle, BridgeReader};
use httpcap_core::events::{
    EventKind, EventPublisher, HttpEvent, Published, RequestEvent, ResponseEvent, Timestamp,
    TransactionEvent,
};
use httpcap_protocols::{
    reparse_request, reparse_response, strip_chunked_marker, BodyDecoding, ClientAddr,
    FramedMessage, Framer, FramingError, StreamError,
};
use httpcap_telemetry::{EventLogger, MetricsRecorder};

/// How a pair's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairExit {
    /// The client stream ended cleanly between transactions.
    Completed,
    /// Framing failed; the connection was abandoned.
    Aborted(FramingError),
    /// The dispatcher closed while publishing.
    Shutdown,
}

enum Failure {
    Framing(FramingError),
    Shutdown,
}

impl From<FramingError> for Failure {
    fn from(err: FramingError) -> Self {
        Failure::Framing(err)
    }
}

pub struct TransactionPair {
    id: u64,
    client: SocketAddr,
    server: SocketAddr,
    up: BridgeReader,
    down: BridgeReader,
    abort: AbortHandle,
    framer: Framer,
    publisher: EventPublisher,
    metrics: MetricsRecorder,
    seq: u64,
}

impl TransactionPair {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        client: SocketAddr,
        server: SocketAddr,
        up: BridgeReader,
        down: BridgeReader,
        abort: AbortHandle,
        framer: Framer,
        publisher: EventPublisher,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            id,
            client,
            server,
            up,
            down,
            abort,
            framer,
            publisher,
            metrics,
            seq: 0,
        }
    }

    /// Runs until the connection ends, fails, or delivery shuts down. Both
    /// bridges are aborted on the way out.
    pub fn run(mut self) -> PairExit {
        debug!(pair = self.id, client = %self.client, server = %self.server, "Pair started");
        let exit = loop {
            match self.handle_transaction() {
                Ok(()) => self.seq += 1,
                Err(Failure::Shutdown) => break PairExit::Shutdown,
                Err(Failure::Framing(err)) if self.ended_between_transactions(&err) => {
                    break PairExit::Completed
                }
                Err(Failure::Framing(err)) => break PairExit::Aborted(err),
            }
        };

        let fired = self.abort.abort();
        match &exit {
            PairExit::Aborted(err) => {
                warn!(
                    pair = self.id,
                    client = %self.client,
                    server = %self.server,
                    seq = self.seq,
                    error = %err,
                    "Abandoning connection"
                );
                if fired {
                    self.metrics.pairs_aborted.inc();
                    EventLogger::log_event(
                        "pair_aborted",
                        vec![
                            KeyValue::new("pair", self.id as i64),
                            KeyValue::new("client", self.client.to_string()),
                            KeyValue::new("reason", err.to_string()),
                        ],
                    );
                }
            }
            PairExit::Completed | PairExit::Shutdown => {
                debug!(pair = self.id, transactions = self.seq, exit = ?exit, "Pair finished");
            }
        }
        exit
    }

    /// A clean close: the client stream ran out exactly at a message
    /// boundary, before any byte of the next request.
    fn ended_between_transactions(&self, err: &FramingError) -> bool {
        matches!(err, FramingError::Stream(StreamError::Ended))
            && self.up.message_span().is_none()
            && self.up.buffered_len() == 0
    }

    fn handle_transaction(&mut self) -> Result<(), Failure> {
        self.up.begin_message();
        let request = self.framer.frame_request(&mut self.up)?;
        let (req_start, req_end) = span_or_now(self.up.message_span());
        trace!(pair = self.id, seq = self.seq, method = %request.line.method, target = %request.line.target, "Request framed");

        self.down.begin_message();
        let response = self.framer.frame_response(&mut self.down, &request.line.method)?;
        let (res_start, res_end) = span_or_now(self.down.message_span());
        trace!(pair = self.id, seq = self.seq, code = response.line.code, "Response framed");

        let parsed_request = reparse_request(&self.reconstruct(&request.message))
            .map(|mut req| {
                req.extensions_mut().insert(ClientAddr(self.client));
                req
            })
            .map_err(|err| self.reparse_failed("request", err))
            .ok();
        let parsed_response = reparse_response(&self.reconstruct(&response.message))
            .map_err(|err| self.reparse_failed("response", err))
            .ok();

        for decoding in [request.message.decoding, response.message.decoding] {
            if decoding == BodyDecoding::Failed {
                self.metrics.decompression_failures.inc();
            }
        }

        let event = TransactionEvent {
            request: RequestEvent {
                event: HttpEvent {
                    kind: EventKind::Request,
                    start: req_start,
                    end: req_end,
                    seq: self.seq,
                },
                client_addr: self.client,
                server_addr: self.server,
                method: request.line.method,
                uri: request.line.target,
                version: request.line.version,
                headers: request.message.headers,
                body: request.message.body,
                decoding: request.message.decoding,
                parsed: parsed_request,
            },
            response: ResponseEvent {
                event: HttpEvent {
                    kind: EventKind::Response,
                    start: res_start,
                    end: res_end,
                    seq: self.seq,
                },
                client_addr: self.client,
                server_addr: self.server,
                version: response.line.version,
                code: response.line.code,
                reason: response.line.reason,
                headers: response.message.headers,
                body: response.message.body,
                decoding: response.message.decoding,
                parsed: parsed_response,
            },
        };

        // A pair marked bad emits nothing more, even for a transaction framed
        // entirely from bytes buffered before the abort.
        if self.abort.is_aborted() {
            return Err(FramingError::Stream(StreamError::Unhealthy).into());
        }
        let latency_us = event.latency().num_microseconds().unwrap_or(i64::MAX);
        match self.publisher.publish_unless(event, &self.abort) {
            Ok(Published::Queued) => {
                self.metrics.transactions.inc();
                self.metrics.transaction_latency.observe(latency_us as f64);
                Ok(())
            }
            Ok(Published::Discarded) => {
                self.metrics.transactions_discarded.inc();
                Ok(())
            }
            Ok(Published::Abandoned) => Err(FramingError::Stream(StreamError::Unhealthy).into()),
            Err(_) => Err(Failure::Shutdown),
        }
    }

    /// Head plus decoded body, without a chunked marker that no longer
    /// describes the body.
    fn reconstruct(&self, message: &FramedMessage) -> Bytes {
        let raw = message.reconstruct();
        if message.content.chunked {
            strip_chunked_marker(&raw)
        } else {
            raw
        }
    }

    fn reparse_failed(&self, what: &str, err: impl std::fmt::Display) {
        self.metrics.reparse_failures.inc();
        warn!(pair = self.id, seq = self.seq, client = %self.client, error = %err, "Reconstructed {what} failed to re-parse");
    }
}

fn span_or_now(span: Option<(Timestamp, Timestamp)>) -> (Timestamp, Timestamp) {
    span.unwrap_or_else(|| {
        let now = Utc::now();
        (now, now)
    })
}
