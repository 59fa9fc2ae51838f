//! # httpcap-core
//!
//! Shared plumbing between TCP reassembly and HTTP reconstruction:
//!
//! - `bridge`: per-direction push-to-pull byte bridge with a bounded-wait
//!   append guard and a shared abort signal
//! - `events`: transaction events and the bounded dispatcher delivering them
//!   to a worker pool or an application-drained queue

pub mod bridge;
pub mod error;
pub mod events;

pub mod prelude {
    pub use crate::bridge::*;
    pub use crate::error::*;
    pub use crate::events::*;
}

pub use error::{BridgeError, DispatchError};
