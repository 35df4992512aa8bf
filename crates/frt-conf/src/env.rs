//! Environment-variable knobs for the config wire protocol.
//!
//! Each knob supports two names for backwards compatibility (a primary
//! `VESPA_CONFIG_PROTOCOL_*` name and a legacy `services__config_protocol_*`
//! alias) and silently falls back to its default if neither is set or the
//! value fails to parse. Read once at `ProtocolConfig::from_env()` and never
//! re-read for the lifetime of a `RequestFactory`.

use serde::{Deserialize, Serialize};
use std::env;

/// Config wire protocol version. 3 is the current mandatory production
/// version; 1 and 2 are accepted for legacy parsing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V3
    }
}

impl ProtocolVersion {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }
}

/// Payload compression scheme negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionType {
    Uncompressed,
    Lz4,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Lz4
    }
}

impl CompressionType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Uncompressed => "UNCOMPRESSED",
            Self::Lz4 => "LZ4",
        }
    }

    fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "UNCOMPRESSED" => Some(Self::Uncompressed),
            "LZ4" => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// The three protocol knobs, resolved once from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub version: ProtocolVersion,
    pub trace_level: u32,
    pub compression: CompressionType,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            trace_level: 0,
            compression: CompressionType::default(),
        }
    }
}

impl ProtocolConfig {
    /// Read all three knobs from the environment, applying the alias and
    /// silent-fallback rules documented on each individual reader.
    pub fn from_env() -> Self {
        Self {
            version: read_protocol_version(),
            trace_level: read_trace_level(),
            compression: read_compression_type(),
        }
    }
}

/// Read a value from `primary`, falling back to `alias` if `primary` is
/// unset. Neither name being present is treated the same as either being
/// unparseable: the caller's default applies.
fn read_aliased(primary: &str, alias: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(alias).ok())
}

fn read_protocol_version() -> ProtocolVersion {
    read_aliased(
        "VESPA_CONFIG_PROTOCOL_VERSION",
        "services__config_protocol_version_override",
    )
    .and_then(|v| v.trim().parse::<i32>().ok())
    .and_then(ProtocolVersion::from_i32)
    .unwrap_or_default()
}

fn read_trace_level() -> u32 {
    read_aliased(
        "VESPA_CONFIG_PROTOCOL_TRACELEVEL",
        "services__config_protocol_tracelevel",
    )
    .and_then(|v| v.trim().parse::<u32>().ok())
    .unwrap_or(0)
}

fn read_compression_type() -> CompressionType {
    read_aliased(
        "VESPA_CONFIG_PROTOCOL_COMPRESSION",
        "services__config_protocol_compression",
    )
    .and_then(|v| CompressionType::from_wire_str(v.trim()))
    .unwrap_or_default()
}
