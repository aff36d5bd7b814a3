//! Device reports
//!
//! Captures every channel of every attached chip into serialisable
//! structures. Used by `chipmon read` for both the table and the JSON
//! output.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::channels::{decode_values, CHANNELS};
use crate::data::{DeviceAddress, RawSnapshot};
use crate::device::Device;
use crate::driver::Driver;
use crate::error::Result;

/// One channel's values in fixed-point form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReading {
    pub name: &'static str,
    pub magnitude: u8,
    pub values: Vec<i64>,
}

impl ChannelReading {
    /// Values rendered with their decimal point, e.g. `3.29`
    pub fn formatted(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| format_fixed(*v, self.magnitude))
            .collect()
    }
}

/// All channels of one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub name: String,
    pub slot: usize,
    pub address: DeviceAddress,
    pub channels: Vec<ChannelReading>,
    pub raw: RawSnapshot,
}

/// Reports for every attached device
#[derive(Debug, Clone, Serialize)]
pub struct DriverReport {
    pub timestamp_ms: u64,
    pub devices: Vec<DeviceReport>,
}

/// Render a fixed-point value with `magnitude` decimal places
pub fn format_fixed(value: i64, magnitude: u8) -> String {
    if magnitude == 0 {
        return value.to_string();
    }
    let scale = 10i64.pow(u32::from(magnitude));
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let scale = scale.unsigned_abs();
    format!(
        "{sign}{}.{:0width$}",
        abs / scale,
        abs % scale,
        width = usize::from(magnitude)
    )
}

/// Read every channel of one device from a single snapshot
pub fn capture_device(device: &Device) -> Result<DeviceReport> {
    let raw = device.snapshot()?;
    let mut channels = Vec::with_capacity(CHANNELS.len());
    for decl in &CHANNELS {
        channels.push(ChannelReading {
            name: decl.name,
            magnitude: decl.magnitude,
            values: decode_values(decl.id, &raw)?,
        });
    }
    Ok(DeviceReport {
        name: device.name(),
        slot: device.slot(),
        address: device.address(),
        channels,
        raw,
    })
}

/// Capture every attached device
pub fn capture_driver(driver: &Driver) -> Result<DriverReport> {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);

    let devices = driver
        .devices()
        .iter()
        .map(|d| capture_device(d))
        .collect::<Result<Vec<_>>>()?;

    debug!(devices = devices.len(), timestamp = timestamp_ms, "Captured driver report");
    Ok(DriverReport {
        timestamp_ms,
        devices,
    })
}

/// Export a report as pretty JSON
pub fn report_to_json(report: &DriverReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
