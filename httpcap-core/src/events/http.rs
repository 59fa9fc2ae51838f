//! Reconstructed HTTP events.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::Duration;
use http::{Request, Response};

use httpcap_protocols::{BodyDecoding, HeaderItem};

use super::network::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Request,
    Response,
}

/// Fields common to both halves of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpEvent {
    pub kind: EventKind,
    /// Capture time of the first byte of the message.
    pub start: Timestamp,
    /// Capture time of the last byte of the message.
    pub end: Timestamp,
    /// Position of this transaction within its connection, from 0.
    pub seq: u64,
}

#[derive(Debug)]
pub struct RequestEvent {
    pub event: HttpEvent,
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<HeaderItem>,
    /// Framed body: de-chunked and, for gzip/deflate, decompressed.
    pub body: Bytes,
    pub decoding: BodyDecoding,
    /// `None` when the reconstructed bytes failed the standard re-parse.
    pub parsed: Option<Request<Bytes>>,
}

#[derive(Debug)]
pub struct ResponseEvent {
    pub event: HttpEvent,
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub version: String,
    pub code: u16,
    pub reason: String,
    pub headers: Vec<HeaderItem>,
    pub body: Bytes,
    pub decoding: BodyDecoding,
    pub parsed: Option<Response<Bytes>>,
}

/// One request matched with its response.
#[derive(Debug)]
pub struct TransactionEvent {
    pub request: RequestEvent,
    pub response: ResponseEvent,
}

impl TransactionEvent {
    pub fn seq(&self) -> u64 {
        self.request.event.seq
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.request.client_addr
    }

    /// Request start to response end, in capture time.
    pub fn latency(&self) -> Duration {
        self.response.event.end - self.request.event.start
    }
}
