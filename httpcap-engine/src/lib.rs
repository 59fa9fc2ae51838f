//! # httpcap-engine
//!
//! HTTP transaction reconstruction on top of TCP reassembly: per-connection
//! [`TransactionPair`] loops, the [`FlowCorrelator`] that creates them, and
//! the [`Sniffer`] runtime driving capture.

pub mod correlator;
pub mod error;
pub mod pair;
pub mod runtime;

pub use correlator::{FlowCorrelator, PairSettings};
pub use error::EngineError;
pub use pair::{PairExit, TransactionPair};
pub use runtime::{PacketSourceSpec, Sniffer};

pub mod prelude {
    pub use super::{EngineError, PacketSourceSpec, Sniffer};
    pub use httpcap_core::events::{EventReceiver, RequestEvent, ResponseEvent, TransactionEvent};
    pub use httpcap_protocols::{ClientAddr, HeaderItem};
}
