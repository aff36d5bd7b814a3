//! Attached chip handle
//!
//! A [`Device`] owns the transport for one chip plus its cached snapshot.
//! The cache mutex is the update lock: refreshes, channel reads and channel
//! writes all hold it, and the ISA transport lock is only ever taken while
//! it is held.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::Clock;
use crate::constants::{bank, chip, init, reg};
use crate::convert;
use crate::data::{DeviceAddress, RawSnapshot};
use crate::error::Result;
use crate::hw::Transport;

/// Cached register snapshot plus its metadata
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub data: RawSnapshot,
    pub valid: bool,
    /// Clock reading of the last successful refresh, in milliseconds
    pub last_updated: u64,
}

/// Which limit of a temperature sensor to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TempLimit {
    Over,
    Hyst,
}

/// One attached W83781D
///
/// Register access stays inside the crate so every bank switch happens
/// under the update lock:
///
/// ```compile_fail
/// fn select_bank(dev: &cm_core::Device) {
///     dev.write_reg(0x4e, 0x02).unwrap();
/// }
/// ```
pub struct Device {
    address: DeviceAddress,
    slot: usize,
    transport: Transport,
    pub(crate) cache: Mutex<CacheState>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) staleness_ms: u64,
    pub(crate) refreshes: AtomicUsize,
}

impl Device {
    pub fn new(
        address: DeviceAddress,
        slot: usize,
        transport: Transport,
        clock: Arc<dyn Clock>,
        staleness_ms: u64,
    ) -> Self {
        Self {
            address,
            slot,
            transport,
            cache: Mutex::new(CacheState::default()),
            clock,
            staleness_ms,
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Registry slot; stable for the lifetime of the handle
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Chip name, e.g. `w83781d-isa-0290`
    pub fn name(&self) -> String {
        self.address.chip_name()
    }

    /// Number of completed refresh passes
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Raw register read, outside the cache
    pub(crate) fn read_reg(&self, reg: u8) -> Result<u8> {
        self.transport.read(reg)
    }

    /// Raw register write, outside the cache
    pub(crate) fn write_reg(&self, reg: u8, value: u8) -> Result<()> {
        self.transport.write(reg, value)
    }

    /// Run `f` with the temperature bank switched to `bank`. The default
    /// bank is restored even when `f` fails.
    pub(crate) fn with_bank<T>(&self, bank: u8, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.write_reg(reg::TEMP_SEL, bank)?;
        let result = f(self);
        let restored = self.write_reg(reg::TEMP_SEL, bank::DEFAULT);
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Write one temperature limit code for sensor `nr` (1..=3)
    pub(crate) fn write_temp_limit(&self, nr: usize, limit: TempLimit, code: u8) -> Result<()> {
        if nr == 1 {
            let reg = match limit {
                TempLimit::Over => reg::TEMP_OVER,
                TempLimit::Hyst => reg::TEMP_HYST,
            };
            return self.write_reg(reg, code);
        }
        let reg = match limit {
            TempLimit::Over => reg::TEMP_OVER23,
            TempLimit::Hyst => reg::TEMP_HYST23,
        };
        self.with_bank(bank::for_sensor(nr), |dev| {
            dev.write_reg(reg, code)?;
            dev.write_reg(reg + 1, 0)
        })
    }

    /// Reset the chip, program default limits and start monitoring
    pub(crate) fn init_chip(&self) -> Result<()> {
        self.write_reg(reg::CONFIG, chip::CONFIG_RESET)?;

        let vid_fandiv = self.read_reg(reg::VID_FANDIV)?;
        let chipid = self.read_reg(reg::CHIPID)?;
        let mut vid = convert::vid_from_reg(convert::vid_code(vid_fandiv, chipid));
        if vid == init::VID_UNKNOWN {
            vid = init::VID_FALLBACK;
        }

        for nr in 0..chip::VOLTAGES {
            let nominal = if nr < 2 { vid } else { init::NOMINAL_IN[nr] };
            let delta = nominal * init::IN_PERCENTAGE / 100;
            self.write_reg(reg::in_min(nr), convert::in_to_reg(nominal - delta, nr))?;
            self.write_reg(reg::in_max(nr), convert::in_to_reg(nominal + delta, nr))?;
        }

        let fan_min = convert::fan_to_reg(init::FAN_MIN_RPM);
        for nr in 1..=chip::FANS {
            self.write_reg(reg::fan_min(nr), fan_min)?;
        }

        let over = convert::temp_to_reg(init::TEMP_OVER);
        let hyst = convert::temp_to_reg(init::TEMP_HYST);
        self.write_reg(reg::TEMP_OVER, over)?;
        self.write_reg(reg::TEMP_HYST, hyst)?;

        for nr in 2..=chip::TEMPS {
            self.with_bank(bank::for_sensor(nr), |dev| {
                dev.write_reg(reg::TEMP_OVER23, over)?;
                dev.write_reg(reg::TEMP_OVER23 + 1, 0)?;
                dev.write_reg(reg::TEMP_HYST23, hyst)?;
                dev.write_reg(reg::TEMP_HYST23 + 1, 0)?;
                dev.write_reg(reg::TEMP_CONFIG, 0)
            })?;
        }

        let config = self.read_reg(reg::CONFIG)?;
        self.write_reg(
            reg::CONFIG,
            (config & chip::CONFIG_INT_CLEAR_MASK) | chip::CONFIG_START,
        )?;

        info!(device = %self.name(), vid, "Initialised chip");
        debug!(slot = self.slot, "Monitoring started");
        Ok(())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("slot", &self.slot)
            .field("transport", &self.transport.to_string())
            .finish()
    }
}
