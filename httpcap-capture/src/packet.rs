//! Link/IP/TCP decode of captured frames into [`TcpSegment`]s.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use etherparse::{NetHeaders, PacketHeaders, TransportHeader};

use crate::capture::LinkKind;
use crate::error::CaptureError;

pub type Timestamp = DateTime<Utc>;

const LOOPBACK_HEADER_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;

/// One direction of a TCP connection.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct FlowKey {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

impl FlowKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self { src, dst }
    }

    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Normalized connection key (lower endpoint first), identical for both
/// directions of a connection.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ConnectionKey {
    a: SocketAddr,
    b: SocketAddr,
}

impl ConnectionKey {
    pub fn endpoints(&self) -> (SocketAddr, SocketAddr) {
        (self.a, self.b)
    }
}

impl From<FlowKey> for ConnectionKey {
    fn from(flow: FlowKey) -> Self {
        if flow.src <= flow.dst {
            Self {
                a: flow.src,
                b: flow.dst,
            }
        } else {
            Self {
                a: flow.dst,
                b: flow.src,
            }
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// A decoded TCP segment.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub key: FlowKey,
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Bytes,
    pub seen: Timestamp,
}

/// Decodes one frame. Returns `Ok(None)` for anything that is not TCP over
/// IPv4/IPv6.
pub fn decode(
    link: LinkKind,
    data: &[u8],
    seen: Timestamp,
) -> Result<Option<TcpSegment>, CaptureError> {
    let headers = match link {
        LinkKind::Ethernet => PacketHeaders::from_ethernet_slice(data),
        LinkKind::RawIp => PacketHeaders::from_ip_slice(data),
        LinkKind::Loopback => match data.get(LOOPBACK_HEADER_LEN..) {
            Some(rest) => PacketHeaders::from_ip_slice(rest),
            None => return Err(CaptureError::Decode("short loopback header".into())),
        },
        LinkKind::LinuxSll => match data.get(SLL_HEADER_LEN..) {
            Some(rest) if is_ip_ethertype(&data[14..16]) => PacketHeaders::from_ip_slice(rest),
            Some(_) => return Ok(None),
            None => return Err(CaptureError::Decode("short cooked header".into())),
        },
        LinkKind::Unsupported(link) => {
            return Err(CaptureError::Decode(format!("unsupported link type {link}")))
        }
    }
    .map_err(|e| CaptureError::Decode(e.to_string()))?;

    let (src_ip, dst_ip) = match &headers.net {
        Some(NetHeaders::Ipv4(ip, _)) => (
            IpAddr::V4(Ipv4Addr::from(ip.source)),
            IpAddr::V4(Ipv4Addr::from(ip.destination)),
        ),
        Some(NetHeaders::Ipv6(ip, _)) => (
            IpAddr::V6(Ipv6Addr::from(ip.source)),
            IpAddr::V6(Ipv6Addr::from(ip.destination)),
        ),
        _ => return Ok(None),
    };

    let Some(TransportHeader::Tcp(tcp)) = &headers.transport else {
        return Ok(None);
    };

    Ok(Some(TcpSegment {
        key: FlowKey::new(
            SocketAddr::new(src_ip, tcp.source_port),
            SocketAddr::new(dst_ip, tcp.destination_port),
        ),
        seq: tcp.sequence_number,
        syn: tcp.syn,
        fin: tcp.fin,
        rst: tcp.rst,
        payload: Bytes::copy_from_slice(headers.payload.slice()),
        seen,
    }))
}

fn is_ip_ethertype(proto: &[u8]) -> bool {
    matches!(proto, [0x08, 0x00] | [0x86, 0xdd])
}
