//! Packet sources: a live interface or a pcap file, both behind one poll API.

use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use pcap::{Activated, Active, Capture, Device, Linktype, Offline};
use tracing::{debug, info};

use crate::error::CaptureError;
use crate::packet::Timestamp;

/// Options for opening a live capture.
#[derive(Clone, Debug)]
pub struct CaptureOptions {
    pub interface: String,
    /// BPF filter expression, e.g. `"tcp port 80"`.
    pub filter: String,
    pub promiscuous: bool,
    pub snaplen: usize,
    /// How long a single poll may block before reporting [`Poll::Timeout`].
    pub timeout_ms: u32,
}

/// Link-layer framing of captured packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    /// Packets start directly with an IPv4/IPv6 header.
    RawIp,
    /// BSD loopback: 4-byte address family header.
    Loopback,
    /// Linux "any" device cooked header (16 bytes).
    LinuxSll,
    Unsupported(i32),
}

impl From<Linktype> for LinkKind {
    fn from(link: Linktype) -> Self {
        match link {
            Linktype::ETHERNET => LinkKind::Ethernet,
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => LinkKind::RawIp,
            Linktype::NULL | Linktype::LOOP => LinkKind::Loopback,
            Linktype::LINUX_SLL => LinkKind::LinuxSll,
            Linktype(other) => LinkKind::Unsupported(other),
        }
    }
}

/// One captured frame, copied out of the pcap buffer.
#[derive(Clone, Debug)]
pub struct RawPacket {
    pub data: Bytes,
    pub seen: Timestamp,
}

/// Outcome of polling a source once.
#[derive(Debug)]
pub enum Poll {
    Packet(RawPacket),
    /// Live capture had nothing within the read timeout.
    Timeout,
    /// Offline capture reached end of file.
    Exhausted,
}

pub enum PacketSource {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

impl PacketSource {
    /// Opens `options.interface` and installs the filter. Any failure here is
    /// a startup error: nothing has been captured yet.
    pub fn open_live(options: &CaptureOptions) -> Result<Self, CaptureError> {
        let device = Device::list()?
            .into_iter()
            .find(|d| d.name == options.interface)
            .ok_or_else(|| CaptureError::DeviceNotFound(options.interface.clone()))?;
        debug!(device = %device.name, desc = ?device.desc, "Found capture device");

        let open_err = |error| CaptureError::Open {
            source_name: options.interface.clone(),
            error,
        };
        let mut cap = Capture::from_device(device)
            .map_err(open_err)?
            .promisc(options.promiscuous)
            .snaplen(i32::try_from(options.snaplen).unwrap_or(i32::MAX))
            .timeout(i32::try_from(options.timeout_ms).unwrap_or(i32::MAX))
            .open()
            .map_err(open_err)?;

        apply_filter(&mut cap, &options.filter)?;
        info!(
            interface = %options.interface,
            filter = %options.filter,
            promiscuous = options.promiscuous,
            "Live capture opened"
        );
        Ok(PacketSource::Live(cap))
    }

    /// Opens a pcap file for replay, applying `filter` like a live capture.
    pub fn open_offline(path: &Path, filter: &str) -> Result<Self, CaptureError> {
        let mut cap = Capture::from_file(path).map_err(|error| CaptureError::Open {
            source_name: path.display().to_string(),
            error,
        })?;
        apply_filter(&mut cap, filter)?;
        info!(file = %path.display(), filter = %filter, "Offline capture opened");
        Ok(PacketSource::Offline(cap))
    }

    pub fn link(&self) -> LinkKind {
        match self {
            PacketSource::Live(cap) => cap.get_datalink().into(),
            PacketSource::Offline(cap) => cap.get_datalink().into(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PacketSource::Live(_))
    }

    pub fn next_packet(&mut self) -> Result<Poll, CaptureError> {
        match self {
            PacketSource::Live(cap) => poll(cap),
            PacketSource::Offline(cap) => poll(cap),
        }
    }
}

fn apply_filter<T: Activated + ?Sized>(
    cap: &mut Capture<T>,
    filter: &str,
) -> Result<(), CaptureError> {
    if filter.is_empty() {
        return Ok(());
    }
    cap.filter(filter, true).map_err(|error| CaptureError::Filter {
        filter: filter.to_string(),
        error,
    })
}

fn poll<T: Activated + ?Sized>(cap: &mut Capture<T>) -> Result<Poll, CaptureError> {
    match cap.next_packet() {
        Ok(packet) => {
            let ts = packet.header.ts;
            Ok(Poll::Packet(RawPacket {
                data: Bytes::copy_from_slice(packet.data),
                seen: timestamp(ts.tv_sec as i64, ts.tv_usec as i64),
            }))
        }
        Err(pcap::Error::TimeoutExpired) => Ok(Poll::Timeout),
        Err(pcap::Error::NoMorePackets) => Ok(Poll::Exhausted),
        Err(e) => Err(CaptureError::Capture(e)),
    }
}

fn timestamp(secs: i64, micros: i64) -> Timestamp {
    let nanos = u32::try_from(micros.clamp(0, 999_999) * 1_000).unwrap_or(0);
    DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}
