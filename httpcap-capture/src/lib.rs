//! httpcap‑capture
//!
//! Packet acquisition and the TCP plumbing underneath HTTP reconstruction:
//! live (pcap) or file capture, link/IP/TCP decode, and per-direction
//! in-order stream reassembly with gap reporting.

pub mod capture;
pub mod error;
pub mod packet;
pub mod reassembly;

pub use capture::{CaptureOptions, LinkKind, PacketSource, Poll, RawPacket};
pub use error::CaptureError;
pub use packet::{ConnectionKey, FlowKey, TcpSegment, Timestamp};
pub use reassembly::{Assembler, FlushStats, StreamHandler};
