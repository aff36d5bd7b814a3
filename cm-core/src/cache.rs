//! Staleness-bounded snapshot cache
//!
//! Every attached device keeps the last full register snapshot. Readers
//! refresh it when it is invalid, older than the staleness window, or when
//! the clock has gone backwards; otherwise they are served from memory
//! without touching the bus.

use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

use crate::constants::{bank, chip, reg};
use crate::convert;
use crate::data::RawSnapshot;
use crate::device::{CacheState, Device};
use crate::error::Result;

/// Millisecond time source for staleness checks
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-independent clock counting from construction
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Device {
    /// Refresh the snapshot if needed. Returns whether a refresh happened.
    pub fn refresh_if_stale(&self) -> Result<bool> {
        let mut cache = self.cache.lock();
        self.refresh_locked(&mut cache)
    }

    /// Take the update lock with the snapshot guaranteed fresh
    pub(crate) fn fresh_state(&self) -> Result<MutexGuard<'_, CacheState>> {
        let mut cache = self.cache.lock();
        self.refresh_locked(&mut cache)?;
        Ok(cache)
    }

    /// Copy of a fresh snapshot
    pub fn snapshot(&self) -> Result<RawSnapshot> {
        Ok(self.fresh_state()?.data)
    }

    /// Force the next reader to refresh
    pub fn invalidate(&self) {
        self.cache.lock().valid = false;
    }

    pub fn is_cache_valid(&self) -> bool {
        self.cache.lock().valid
    }

    fn refresh_locked(&self, cache: &mut CacheState) -> Result<bool> {
        let now = self.clock.now_ms();
        let stale = !cache.valid
            || now < cache.last_updated
            || now - cache.last_updated > self.staleness_ms;
        if !stale {
            return Ok(false);
        }

        match self.read_snapshot() {
            Ok(data) => {
                cache.data = data;
                cache.last_updated = now;
                cache.valid = true;
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                debug!(device = %self.name(), now, "Refreshed register snapshot");
                Ok(true)
            }
            Err(e) => {
                warn!(device = %self.name(), error = %e, "Refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Read every register group into a new snapshot
    fn read_snapshot(&self) -> Result<RawSnapshot> {
        let mut data = RawSnapshot::default();

        for nr in 0..chip::VOLTAGES {
            data.in_input[nr] = self.read_reg(reg::in_input(nr))?;
            data.in_min[nr] = self.read_reg(reg::in_min(nr))?;
            data.in_max[nr] = self.read_reg(reg::in_max(nr))?;
        }

        for nr in 1..=chip::FANS {
            data.fan[nr - 1] = self.read_reg(reg::fan(nr))?;
            data.fan_min[nr - 1] = self.read_reg(reg::fan_min(nr))?;
        }

        data.temp[0] = self.read_reg(reg::TEMP)?;
        data.temp_over[0] = self.read_reg(reg::TEMP_OVER)?;
        data.temp_hyst[0] = self.read_reg(reg::TEMP_HYST)?;

        for nr in 2..=chip::TEMPS {
            let (temp, over, hyst) = self.with_bank(bank::for_sensor(nr), |dev| {
                Ok((
                    dev.read_reg(reg::TEMP23)?,
                    dev.read_reg(reg::TEMP_OVER23)?,
                    dev.read_reg(reg::TEMP_HYST23)?,
                ))
            })?;
            data.temp[nr - 1] = temp;
            data.temp_over[nr - 1] = over;
            data.temp_hyst[nr - 1] = hyst;
        }

        let vid_fandiv = self.read_reg(reg::VID_FANDIV)?;
        let chipid = self.read_reg(reg::CHIPID)?;
        data.vid = convert::vid_code(vid_fandiv, chipid);
        data.fan_div = convert::fan_div_codes(vid_fandiv);

        let alarm1 = self.read_reg(reg::ALARM1)?;
        let alarm2 = self.read_reg(reg::ALARM2)?;
        data.alarms = convert::alarms_from_reg(alarm1, alarm2);

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AdapterId, DeviceAddress};
    use crate::hw::Transport;
    use crate::sim::{SimulatedChip, SimulatedIsaBus};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn isa_device(chip: Arc<SimulatedChip>, clock: Arc<ManualClock>) -> Device {
        let bus = Arc::new(SimulatedIsaBus::new());
        bus.attach(0x290, chip);
        Device::new(
            DeviceAddress::Isa { adapter: AdapterId(0), base: 0x290 },
            0,
            Transport::isa(0x290, bus),
            clock,
            1500,
        )
    }

    #[test]
    fn test_first_read_refreshes() {
        let chip = Arc::new(SimulatedChip::new());
        let dev = isa_device(chip.clone(), Arc::new(ManualClock::new(0)));
        assert!(!dev.is_cache_valid());

        let snap = dev.snapshot().unwrap();
        assert!(dev.is_cache_valid());
        assert_eq!(snap.in_input[2], 206);
        assert_eq!(snap.temp, [40, 45, 38]);
        assert_eq!(snap.fan_div, [1, 1]);
        assert_eq!(snap.vid, 0x04);
        assert_eq!(dev.refresh_count(), 1);
        assert_eq!(chip.bank(), bank::DEFAULT);
    }

    #[test]
    fn test_fresh_cache_issues_no_transactions() {
        let chip = Arc::new(SimulatedChip::new());
        let clock = Arc::new(ManualClock::new(0));
        let dev = isa_device(chip.clone(), clock.clone());

        dev.snapshot().unwrap();
        let reads = chip.read_count();
        clock.advance(1500);
        assert!(!dev.refresh_if_stale().unwrap());
        assert_eq!(chip.read_count(), reads);

        clock.advance(1);
        assert!(dev.refresh_if_stale().unwrap());
        assert!(chip.read_count() > reads);
    }

    #[test]
    fn test_clock_going_backwards_refreshes() {
        let chip = Arc::new(SimulatedChip::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let dev = isa_device(chip, clock.clone());

        dev.snapshot().unwrap();
        clock.set(5_000);
        assert!(dev.refresh_if_stale().unwrap());
        assert_eq!(dev.refresh_count(), 2);
    }

    #[test]
    fn test_failed_refresh_keeps_previous_snapshot() {
        let chip = Arc::new(SimulatedChip::new());
        let clock = Arc::new(ManualClock::new(0));
        let dev = isa_device(chip.clone(), clock.clone());

        let before = dev.snapshot().unwrap();
        chip.set_reg(reg::in_input(0), 0x99);
        chip.fail_reads(true);
        clock.advance(2000);

        assert!(dev.refresh_if_stale().unwrap_err().is_transport());
        assert!(dev.is_cache_valid());
        assert_eq!(dev.cache.lock().data, before);
        assert_eq!(dev.cache.lock().last_updated, 0);

        chip.fail_reads(false);
        assert_eq!(dev.snapshot().unwrap().in_input[0], 0x99);
    }

    #[test]
    fn test_failed_first_refresh_leaves_cache_invalid() {
        let chip = Arc::new(SimulatedChip::new());
        chip.fail_reads(true);
        let dev = isa_device(chip, Arc::new(ManualClock::new(0)));
        assert!(dev.snapshot().is_err());
        assert!(!dev.is_cache_valid());
    }

    #[test]
    fn test_concurrent_readers_share_one_refresh() {
        let chip = Arc::new(SimulatedChip::new());
        let clock = Arc::new(ManualClock::new(0));
        let dev = Arc::new(isa_device(chip.clone(), clock.clone()));

        dev.snapshot().unwrap();
        let batch = chip.read_count();
        clock.advance(5000);
        chip.set_read_delay(Some(Duration::from_micros(200)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dev = dev.clone();
                thread::spawn(move || dev.snapshot().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(chip.read_count(), batch * 2);
        assert_eq!(dev.refresh_count(), 2);
    }

    #[test]
    fn test_alarms_combine_both_banks() {
        let chip = Arc::new(SimulatedChip::new());
        chip.set_reg(reg::ALARM1, 0x01);
        chip.set_reg(reg::ALARM2, 0x02);
        let dev = isa_device(chip, Arc::new(ManualClock::new(0)));
        assert_eq!(dev.snapshot().unwrap().alarms, 0x0201);
    }

    #[test]
    fn test_vid_high_bit_from_chipid() {
        let chip = Arc::new(SimulatedChip::with_chip_id(0x21));
        let dev = isa_device(chip, Arc::new(ManualClock::new(0)));
        assert_eq!(dev.snapshot().unwrap().vid, 0x14);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        thread::sleep(Duration::from_millis(2));
        assert!(clock.now_ms() >= a);
    }
}
