/*
 * This file is part of chipmon.
 *
 * Copyright (C) 2025 chipmon contributors
 *
 * chipmon is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * chipmon is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with chipmon. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface
//!
//! Every invocation builds fresh driver state: probe the configured buses,
//! run the command, and detach everything on exit.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cm_core::constants::limits;
use cm_core::{
    capture_device, capture_driver, format_fixed, load_config, load_config_from, report_to_json,
    Adapter, AttributeTable, ChannelId, DeviceReport, Driver, DriverConfig, CHANNELS,
};
use tracing::{debug, warn};

use crate::hardware::{require_root, simulated_adapters, system_adapters};

#[derive(Parser, Debug)]
#[command(name = "chipmon")]
#[command(version)]
#[command(about = "chipmon - Winbond W83781D hardware monitor")]
#[command(long_about = "chipmon - Winbond W83781D hardware monitor

Probes the ISA port pair and SMBus adapters for W83781D chips and exposes
their voltage, fan, temperature, VID, divisor and alarm channels.

Values are fixed-point: voltages in hundredths of a volt, temperatures in
tenths of a degree Celsius, fans in RPM.

EXAMPLES:
    chipmon probe                      Probe and list attached chips
    chipmon read                       Show every channel
    chipmon read --json                Full report as JSON
    chipmon write 0 temp 650 550       Set over/hyst limits of sensor 1
    chipmon write 0 fan_div 4 8        Set fan 1 and fan 2 divisors
    chipmon --simulate read            Run against simulated chips

ENVIRONMENT VARIABLES:
    RUST_LOG=debug         Enable debug logging
    CHIPMON_CONFIG=PATH    Use a specific config file

FILES:
    ~/.config/chipmon/config.json    Per-user configuration
    /etc/chipmon/config.json         System configuration")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file to use instead of the default search path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `cm_core=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Use simulated chips instead of real hardware
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe all configured buses and list attached chips
    Probe,

    /// Print every channel of every attached chip
    Read {
        /// Emit a JSON report instead of a table
        #[arg(long)]
        json: bool,

        /// Only show the chip in this slot
        #[arg(long)]
        slot: Option<usize>,
    },

    /// Write limits to one channel
    Write {
        /// Registry slot of the chip
        slot: usize,

        /// Channel name, e.g. in0, fan2, temp3, fan_div
        channel: String,

        /// Fixed-point values for the channel's writable fields, in order
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,
    },

    /// List channel declarations
    Channels,
}

/// Run a parsed command line, writing results to `out`
pub fn run(cli: &Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    if let Commands::Channels = cli.command {
        return cmd_channels(out);
    }

    let config = load_cli_config(cli)?;
    let adapters = if cli.simulate {
        simulated_adapters(&config)
    } else {
        require_root()?;
        system_adapters(&config)?
    };

    let table = Arc::new(AttributeTable::new(limits::DEFAULT_ATTRIBUTE_ENTRIES));
    let driver = Driver::new(config, table.clone()).context("invalid driver configuration")?;
    attach_all(&driver, &adapters);

    match &cli.command {
        Commands::Probe => cmd_probe(&driver, out),
        Commands::Read { json, slot } => cmd_read(&driver, *json, *slot, out),
        Commands::Write {
            slot,
            channel,
            values,
        } => cmd_write(&driver, *slot, channel, values, out),
        Commands::Channels => cmd_channels(out),
    }
}

fn load_cli_config(cli: &Cli) -> anyhow::Result<DriverConfig> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => load_config().context("failed to load config")?,
    };
    debug!(?config, "Configuration loaded");
    Ok(config)
}

fn attach_all(driver: &Driver, adapters: &[Adapter]) {
    for adapter in adapters {
        if let Err(e) = driver.attach_adapter(adapter) {
            warn!(adapter = %adapter.id(), "Probe failed: {}", e);
        }
    }
}

// ============================================================================
// Probe Command
// ============================================================================

fn cmd_probe(driver: &Driver, out: &mut dyn Write) -> anyhow::Result<()> {
    let devices = driver.devices();
    writeln!(out, "Attached chips ({}/{}):", devices.len(), driver.capacity())?;
    for device in &devices {
        writeln!(out, "  [{}] {}", device.slot(), device.name())?;
    }
    Ok(())
}

// ============================================================================
// Read Command
// ============================================================================

fn value_labels(id: ChannelId) -> &'static [&'static str] {
    match id {
        ChannelId::In(_) => &["min", "max", "input"],
        ChannelId::Fan(_) => &["min", "input"],
        ChannelId::Temp(_) => &["over", "hyst", "input"],
        ChannelId::Vid => &["vid"],
        ChannelId::FanDiv => &["fan1", "fan2", "fan3"],
        ChannelId::Alarms => &["mask"],
    }
}

fn print_report(report: &DeviceReport, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "{} (slot {})", report.name, report.slot)?;
    for (reading, decl) in report.channels.iter().zip(CHANNELS.iter()) {
        let fields: Vec<String> = value_labels(decl.id)
            .iter()
            .zip(reading.values.iter())
            .map(|(label, value)| match decl.id {
                ChannelId::Alarms => format!("{} 0x{:04x}", label, value),
                _ => format!("{} {}", label, format_fixed(*value, reading.magnitude)),
            })
            .collect();
        writeln!(out, "  {:<8} {}", reading.name, fields.join("  "))?;
    }
    Ok(())
}

fn cmd_read(
    driver: &Driver,
    json: bool,
    slot: Option<usize>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    if json {
        let mut report = capture_driver(driver)?;
        if let Some(slot) = slot {
            report.devices.retain(|d| d.slot == slot);
        }
        writeln!(out, "{}", report_to_json(&report)?)?;
        return Ok(());
    }

    let devices = match slot {
        Some(slot) => vec![driver
            .device(slot)
            .with_context(|| format!("no chip in slot {}", slot))?],
        None => driver.devices(),
    };
    if devices.is_empty() {
        writeln!(out, "No chips attached")?;
    }
    for device in &devices {
        let report = capture_device(device)
            .with_context(|| format!("failed to read {}", device.name()))?;
        print_report(&report, out)?;
    }
    Ok(())
}

// ============================================================================
// Write Command
// ============================================================================

fn cmd_write(
    driver: &Driver,
    slot: usize,
    channel: &str,
    values: &[i64],
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let device = driver
        .device(slot)
        .with_context(|| format!("no chip in slot {}", slot))?;
    let id = ChannelId::from_name(channel)?;
    device
        .write_channel(id, values)
        .with_context(|| format!("failed to write {}/{}", device.name(), channel))?;

    let now = device.read_channel_values(id)?;
    let magnitude = device.channel_info(id)?;
    let shown: Vec<String> = now.iter().map(|v| format_fixed(*v, magnitude)).collect();
    writeln!(out, "{}/{}: {}", device.name(), channel, shown.join(" "))?;
    Ok(())
}

// ============================================================================
// Channels Command
// ============================================================================

fn cmd_channels(out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "{:<8} {:>9} {:>6} {:>8}", "channel", "magnitude", "values", "writable")?;
    for decl in &CHANNELS {
        writeln!(
            out,
            "{:<8} {:>9} {:>6} {:>8}",
            decl.name, decl.magnitude, decl.values, decl.writable
        )?;
    }
    Ok(())
}
