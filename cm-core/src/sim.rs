//! Simulated W83781D chips and buses
//!
//! Used by the test suites and by `chipmon --simulate`. The register file
//! models the parts of the chip the driver depends on: the banked
//! temperature registers at 0x50..0x57, the CONFIG reset bit, and CHIPID.
//! Reads and writes are counted and can be made to fail on demand.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::constants::{bank, chip, isa, reg};
use crate::error::{ChipmonError, Result};
use crate::hw::{PortIo, SmbusAdapter};

const BANKED_FIRST: u8 = 0x50;
const BANKED_LAST: u8 = 0x57;

/// VID nibble a fresh simulated chip reports (1.85 V)
pub const DEFAULT_VID_NIBBLE: u8 = 0x04;

struct Registers {
    regs: [u8; 256],
    // 0x50..0x57 as seen through bank 2 and bank 4
    sensor2: [u8; 8],
    sensor3: [u8; 8],
    bank: u8,
}

impl Registers {
    fn cell(&mut self, reg: u8) -> &mut u8 {
        let idx = usize::from(reg.wrapping_sub(BANKED_FIRST));
        let banked = (BANKED_FIRST..=BANKED_LAST).contains(&reg);
        match self.bank {
            bank::SENSOR2 if banked => &mut self.sensor2[idx],
            bank::SENSOR3 if banked => &mut self.sensor3[idx],
            _ => &mut self.regs[usize::from(reg)],
        }
    }

    fn read(&mut self, reg: u8) -> u8 {
        if reg == reg::TEMP_SEL {
            return self.bank;
        }
        *self.cell(reg)
    }

    fn write(&mut self, reg: u8, value: u8) {
        if reg == reg::TEMP_SEL {
            self.bank = value;
            return;
        }
        if reg == reg::CONFIG && value & chip::CONFIG_RESET != 0 {
            // Reset puts both programmable divisors back to 2 (code 01)
            let vid = self.regs[usize::from(reg::VID_FANDIV)] & 0x0f;
            self.regs[usize::from(reg::VID_FANDIV)] = 0x50 | vid;
            self.regs[usize::from(reg::CONFIG)] = value & !chip::CONFIG_RESET;
            return;
        }
        *self.cell(reg) = value;
    }
}

/// Register-level model of one chip
pub struct SimulatedChip {
    registers: Mutex<Registers>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl SimulatedChip {
    /// A powered-on chip with plausible sensor readings
    pub fn new() -> Self {
        let mut regs = [0u8; 256];
        regs[usize::from(reg::CHIPID)] = chip::ID;
        regs[usize::from(reg::VID_FANDIV)] = 0x50 | DEFAULT_VID_NIBBLE;
        // 1.80 V, 1.80 V, 3.30 V, 5.00 V, 12.0 V, -12 V, -5 V
        let inputs = [113u8, 113, 206, 185, 198, 216, 208];
        for (nr, code) in inputs.iter().enumerate() {
            regs[usize::from(reg::in_input(nr))] = *code;
        }
        regs[usize::from(reg::fan(1))] = 113;
        regs[usize::from(reg::fan(2))] = 150;
        regs[usize::from(reg::fan(3))] = 255;
        regs[usize::from(reg::TEMP)] = 40;

        let mut sensor2 = [0u8; 8];
        let mut sensor3 = [0u8; 8];
        sensor2[0] = 45;
        sensor3[0] = 38;

        Self {
            registers: Mutex::new(Registers {
                regs,
                sensor2,
                sensor3,
                bank: bank::DEFAULT,
            }),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            read_delay: Mutex::new(None),
        }
    }

    /// A chip reporting a specific CHIPID
    pub fn with_chip_id(id: u8) -> Self {
        let chip = Self::new();
        chip.set_reg(reg::CHIPID, id);
        chip
    }

    pub fn read(&self, reg: u8) -> Result<u8> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ChipmonError::transport(format!("simulated read fault at 0x{reg:02x}")));
        }
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.registers.lock().read(reg))
    }

    pub fn write(&self, reg: u8, value: u8) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChipmonError::transport(format!("simulated write fault at 0x{reg:02x}")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.registers.lock().write(reg, value);
        Ok(())
    }

    // Direct access for tests; bypasses counters and banking

    pub fn reg(&self, reg: u8) -> u8 {
        self.registers.lock().regs[usize::from(reg)]
    }

    pub fn set_reg(&self, reg: u8, value: u8) {
        self.registers.lock().regs[usize::from(reg)] = value;
    }

    /// Register 0x50..0x57 as seen through `bank` (2 or 4)
    pub fn banked(&self, bank: u8, reg: u8) -> u8 {
        let regs = self.registers.lock();
        let idx = usize::from(reg - BANKED_FIRST);
        if bank == bank::SENSOR3 {
            regs.sensor3[idx]
        } else {
            regs.sensor2[idx]
        }
    }

    pub fn set_banked(&self, bank: u8, reg: u8, value: u8) {
        let mut regs = self.registers.lock();
        let idx = usize::from(reg - BANKED_FIRST);
        if bank == bank::SENSOR3 {
            regs.sensor3[idx] = value;
        } else {
            regs.sensor2[idx] = value;
        }
    }

    /// Currently selected temperature bank
    pub fn bank(&self) -> u8 {
        self.registers.lock().bank
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Slow every register read down, to widen race windows in tests
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }
}

impl Default for SimulatedChip {
    fn default() -> Self {
        Self::new()
    }
}

struct IsaSlot {
    chip: Arc<SimulatedChip>,
    index: u8,
}

/// ISA I/O space with chips at chosen base addresses. Ports nobody drives
/// read back as 0xff.
#[derive(Default)]
pub struct SimulatedIsaBus {
    slots: Mutex<HashMap<u16, IsaSlot>>,
    overrides: Mutex<HashMap<u16, u8>>,
}

impl SimulatedIsaBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a chip at `base`; its address latch starts out at 0xff
    pub fn attach(&self, base: u16, chip: Arc<SimulatedChip>) {
        self.slots.lock().insert(
            base,
            IsaSlot {
                chip,
                index: isa::FLOATING,
            },
        );
    }

    pub fn remove(&self, base: u16) {
        self.slots.lock().remove(&base);
    }

    /// Make `port` read back a fixed value
    pub fn drive_port(&self, port: u16, value: u8) {
        self.overrides.lock().insert(port, value);
    }
}

impl PortIo for SimulatedIsaBus {
    fn inb(&self, port: u16) -> Result<u8> {
        if let Some(value) = self.overrides.lock().get(&port) {
            return Ok(*value);
        }
        let base = port & !(isa::EXTENT - 1);
        let offset = port - base;
        let slots = self.slots.lock();
        let Some(slot) = slots.get(&base) else {
            return Ok(isa::FLOATING);
        };
        match offset {
            isa::ADDR_REG_OFFSET => Ok(slot.index),
            isa::DATA_REG_OFFSET => slot.chip.read(slot.index),
            _ => Ok(isa::FLOATING),
        }
    }

    fn outb(&self, port: u16, value: u8) -> Result<()> {
        let base = port & !(isa::EXTENT - 1);
        let offset = port - base;
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&base) else {
            return Ok(());
        };
        match offset {
            isa::ADDR_REG_OFFSET => {
                slot.index = value;
                Ok(())
            }
            isa::DATA_REG_OFFSET => slot.chip.write(slot.index, value),
            _ => Ok(()),
        }
    }
}

/// One SMBus adapter; addresses without a chip do not acknowledge
#[derive(Default)]
pub struct SimulatedSmbus {
    chips: Mutex<HashMap<u8, Arc<SimulatedChip>>>,
}

impl SimulatedSmbus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, address: u8, chip: Arc<SimulatedChip>) {
        self.chips.lock().insert(address, chip);
    }

    pub fn remove(&self, address: u8) {
        self.chips.lock().remove(&address);
    }

    fn chip(&self, address: u8) -> Result<Arc<SimulatedChip>> {
        self.chips
            .lock()
            .get(&address)
            .cloned()
            .ok_or_else(|| ChipmonError::transport(format!("no acknowledge from 0x{address:02x}")))
    }
}

impl SmbusAdapter for SimulatedSmbus {
    fn read_byte_data(&self, address: u8, reg: u8) -> Result<u8> {
        self.chip(address)?.read(reg)
    }

    fn write_byte_data(&self, address: u8, reg: u8, value: u8) -> Result<()> {
        self.chip(address)?.write(reg, value)
    }
}
