//! Core data types for chipmon
//!
//! Device identity (which transport, which address) and the raw register
//! snapshot kept by each attached chip.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::chip;

/// Identifier of a bus adapter, assigned by whoever enumerates adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdapterId(pub u32);

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical access method of a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Indexed address/data port pair on the ISA bus
    Isa,
    /// Addressed byte-data transfers on an SMBus adapter
    Smbus,
}

/// Transport identity of an attached chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceAddress {
    Isa { adapter: AdapterId, base: u16 },
    Smbus { adapter: AdapterId, address: u8 },
}

impl DeviceAddress {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Isa { .. } => TransportKind::Isa,
            Self::Smbus { .. } => TransportKind::Smbus,
        }
    }

    pub fn adapter(&self) -> AdapterId {
        match self {
            Self::Isa { adapter, .. } | Self::Smbus { adapter, .. } => *adapter,
        }
    }

    /// Name in the usual sensors style, e.g. `w83781d-isa-0290`
    pub fn chip_name(&self) -> String {
        format!("{}-{}", chip::NAME, self)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isa { base, .. } => write!(f, "isa-{:04x}", base),
            Self::Smbus { adapter, address } => write!(f, "i2c-{}-{:02x}", adapter, address),
        }
    }
}

/// Register values captured by one refresh pass
///
/// Every field holds the raw register code; conversion to physical units
/// happens when a channel is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RawSnapshot {
    pub in_input: [u8; 7],
    pub in_min: [u8; 7],
    pub in_max: [u8; 7],
    pub fan: [u8; 3],
    pub fan_min: [u8; 3],
    pub temp: [u8; 3],
    pub temp_over: [u8; 3],
    pub temp_hyst: [u8; 3],
    /// Divisor codes for fans 1 and 2; fan 3 is fixed at 2
    pub fan_div: [u8; 2],
    /// 5-bit VID code
    pub vid: u8,
    /// ALARM1 in bits 0..7, ALARM2 in bits 8..15
    pub alarms: u16,
}
