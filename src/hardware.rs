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

//! Adapter construction
//!
//! Builds the buses the driver probes: either the host's `/dev/port` and
//! `/dev/i2c-*` devices, or a simulated pair of buses with one chip each.

use std::path::Path;
use std::sync::Arc;

use cm_core::sim::{SimulatedChip, SimulatedIsaBus, SimulatedSmbus};
use cm_core::{Adapter, AdapterId, DriverConfig, IsaAdapter, RegionMap, SmbusBus};
use tracing::{info, warn};

/// Adapter id used for the ISA bus; SMBus adapters use their bus number
pub const ISA_ADAPTER: AdapterId = AdapterId(u32::MAX);

/// Address of the simulated SMBus chip
pub const SIMULATED_SMBUS_ADDRESS: u8 = 0x2d;

/// Bus number of an i2c-dev node such as `/dev/i2c-3`
pub fn bus_number(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("i2c-")?
        .parse()
        .ok()
}

/// One simulated chip on ISA at each configured base, one on SMBus
pub fn simulated_adapters(config: &DriverConfig) -> Vec<Adapter> {
    let isa_bus = Arc::new(SimulatedIsaBus::new());
    for &base in &config.isa_addresses {
        isa_bus.attach(base, Arc::new(SimulatedChip::new()));
    }
    let smbus = Arc::new(SimulatedSmbus::new());
    smbus.attach(SIMULATED_SMBUS_ADDRESS, Arc::new(SimulatedChip::new()));

    info!(isa_chips = config.isa_addresses.len(), "Using simulated buses");
    vec![
        Adapter::Isa(IsaAdapter {
            id: ISA_ADAPTER,
            ports: isa_bus,
            regions: Arc::new(RegionMap::new()),
        }),
        Adapter::Smbus(SmbusBus {
            id: AdapterId(0),
            bus: smbus,
            name: "simulated".to_string(),
        }),
    ]
}

/// Open the host's buses as configured
#[cfg(target_os = "linux")]
pub fn system_adapters(config: &DriverConfig) -> anyhow::Result<Vec<Adapter>> {
    use cm_core::constants::paths;
    use cm_core::{DevPort, I2cDevBus};

    let mut adapters = Vec::new();

    if !config.isa_addresses.is_empty() {
        match DevPort::open(&config.port_device) {
            Ok(port) => adapters.push(Adapter::Isa(IsaAdapter {
                id: ISA_ADAPTER,
                ports: Arc::new(port),
                regions: Arc::new(RegionMap::from_proc_ioports(Path::new(paths::PROC_IOPORTS))),
            })),
            Err(e) => warn!("ISA probing disabled: {}", e),
        }
    }

    for (index, path) in config.i2c_buses.iter().enumerate() {
        let id = bus_number(path).unwrap_or(index as u32);
        if !path.exists() {
            warn!("SMBus adapter {:?} does not exist, skipping", path);
            continue;
        }
        adapters.push(Adapter::Smbus(SmbusBus {
            id: AdapterId(id),
            bus: Arc::new(I2cDevBus::new(path.clone())),
            name: path.display().to_string(),
        }));
    }

    if adapters.is_empty() {
        anyhow::bail!("no usable buses (check port_device and i2c_buses in the config)");
    }
    Ok(adapters)
}

#[cfg(not(target_os = "linux"))]
pub fn system_adapters(_config: &DriverConfig) -> anyhow::Result<Vec<Adapter>> {
    anyhow::bail!("hardware access is only supported on Linux; try --simulate")
}

/// Exit with an error unless running as root
pub fn require_root() -> anyhow::Result<()> {
    // SAFETY: geteuid has no preconditions
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        let program = std::env::args().next().unwrap_or_else(|| "chipmon".to_string());
        anyhow::bail!(
            "chipmon needs root privileges for port and SMBus access; run with: sudo {}, or use --simulate",
            program
        );
    }
    Ok(())
}
