//! ## httpcap-core::events
//! **Event model and the bounded dispatcher that delivers it**
//!
//! - `network`: raw stream chunks (`DataBlock`) and flow identity
//! - `http`: reconstructed request/response/transaction events
//! - `bus`: bounded queue, worker pool and single-owner shutdown

pub mod bus;
pub mod http;
pub mod network;

pub use self::bus::{
    DeliveryMode, DispatcherShutdown, EventDispatcher, EventPublisher, EventReceiver, Published,
    TransactionHandler,
};
pub use self::http::{EventKind, HttpEvent, RequestEvent, ResponseEvent, TransactionEvent};
pub use self::network::{ConnectionKey, DataBlock, FlowKey, Timestamp};
