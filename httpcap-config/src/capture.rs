//! Packet capture configuration for live interfaces and pcap replay.

use serde::{Deserialize, Deserializer, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Packet capture configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    /// Network interface for live capture.
    #[validate(custom(function = validation::validate_interface))]
    pub interface: String,

    /// BPF filter applied to live and replayed captures.
    #[validate(custom(function = validation::validate_filter))]
    pub filter: String,

    /// Run in promiscuous mode?
    pub promiscuous: bool,

    /// Maximum bytes captured per packet.
    #[validate(range(min = 4096, max = 1073741824))]
    #[serde(deserialize_with = "deserialize_size")]
    pub snaplen: usize,

    /// Live poll timeout (milliseconds).
    #[validate(range(min = 1, max = 60000))]
    pub timeout_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".into(),
            filter: "tcp".into(),
            promiscuous: false,
            snaplen: 1048576,
            timeout_ms: 1000,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

/// Accepts human‑friendly sizes (e.g. "1MiB") or plain numbers.
pub(crate) fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(split);
    let number: f64 = num_part
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "b" | "" => 1.0,
        "kb" | "kib" => 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        other => return Err(format!("unknown size unit '{other}'")),
    };
    Ok((number * multiplier) as usize)
}
