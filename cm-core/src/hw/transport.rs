//! Register transports
//!
//! A chip is reached either through an indexed port pair on the ISA bus or
//! through byte-data transfers on an SMBus adapter. Both expose the same
//! `read(reg)` / `write(reg, value)` pair so nothing above this module
//! cares which one is in use.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::constants::isa;
use crate::error::Result;

/// Raw byte access to I/O ports
#[cfg_attr(test, mockall::automock)]
pub trait PortIo: Send + Sync {
    fn inb(&self, port: u16) -> Result<u8>;
    fn outb(&self, port: u16, value: u8) -> Result<()>;
}

/// SMBus byte-data transfers on one adapter
#[cfg_attr(test, mockall::automock)]
pub trait SmbusAdapter: Send + Sync {
    fn read_byte_data(&self, address: u8, reg: u8) -> Result<u8>;
    fn write_byte_data(&self, address: u8, reg: u8, value: u8) -> Result<()>;
}

/// Exclusive claims on ranges of I/O ports
#[cfg_attr(test, mockall::automock)]
pub trait RegionReserver: Send + Sync {
    fn is_reserved(&self, base: u16, extent: u16) -> bool;
    fn reserve(&self, base: u16, extent: u16, owner: &str) -> Result<()>;
    fn release(&self, base: u16, extent: u16);
}

/// Indexed port pair: write the register number to base+5, then move the
/// value through base+6
pub struct IsaTransport {
    base: u16,
    ports: Arc<dyn PortIo>,
    // Serialises the index write with the data access that follows it
    lock: Mutex<()>,
}

impl IsaTransport {
    pub fn new(base: u16, ports: Arc<dyn PortIo>) -> Self {
        Self {
            base,
            ports,
            lock: Mutex::new(()),
        }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    fn addr_port(&self) -> u16 {
        self.base + isa::ADDR_REG_OFFSET
    }

    fn data_port(&self) -> u16 {
        self.base + isa::DATA_REG_OFFSET
    }

    pub fn read(&self, reg: u8) -> Result<u8> {
        let _guard = self.lock.lock();
        self.ports.outb(self.addr_port(), reg)?;
        self.ports.inb(self.data_port())
    }

    pub fn write(&self, reg: u8, value: u8) -> Result<()> {
        let _guard = self.lock.lock();
        self.ports.outb(self.addr_port(), reg)?;
        self.ports.outb(self.data_port(), value)
    }
}

/// One 7-bit address on an SMBus adapter
pub struct SmbusTransport {
    address: u8,
    bus: Arc<dyn SmbusAdapter>,
}

impl SmbusTransport {
    pub fn new(address: u8, bus: Arc<dyn SmbusAdapter>) -> Self {
        Self { address, bus }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn read(&self, reg: u8) -> Result<u8> {
        self.bus.read_byte_data(self.address, reg)
    }

    pub fn write(&self, reg: u8, value: u8) -> Result<()> {
        self.bus.write_byte_data(self.address, reg, value)
    }
}

/// Register access for one chip, whichever bus it sits on
pub enum Transport {
    Isa(IsaTransport),
    Smbus(SmbusTransport),
}

impl Transport {
    pub fn isa(base: u16, ports: Arc<dyn PortIo>) -> Self {
        Self::Isa(IsaTransport::new(base, ports))
    }

    pub fn smbus(address: u8, bus: Arc<dyn SmbusAdapter>) -> Self {
        Self::Smbus(SmbusTransport::new(address, bus))
    }

    pub fn read(&self, reg: u8) -> Result<u8> {
        let value = match self {
            Self::Isa(t) => t.read(reg)?,
            Self::Smbus(t) => t.read(reg)?,
        };
        trace!(transport = %self, reg, value, "read");
        Ok(value)
    }

    pub fn write(&self, reg: u8, value: u8) -> Result<()> {
        trace!(transport = %self, reg, value, "write");
        match self {
            Self::Isa(t) => t.write(reg, value),
            Self::Smbus(t) => t.write(reg, value),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isa(t) => write!(f, "isa@0x{:04x}", t.base),
            Self::Smbus(t) => write!(f, "smbus@0x{:02x}", t.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChipmonError;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::thread;

    #[test]
    fn test_isa_read_selects_index_then_reads_data() {
        let mut ports = MockPortIo::new();
        let mut seq = Sequence::new();
        ports
            .expect_outb()
            .with(eq(0x295), eq(0x58))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        ports
            .expect_inb()
            .with(eq(0x296))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(0x20));

        let transport = Transport::isa(0x290, Arc::new(ports));
        assert_eq!(transport.read(0x58).unwrap(), 0x20);
    }

    #[test]
    fn test_isa_write_selects_index_then_writes_data() {
        let mut ports = MockPortIo::new();
        let mut seq = Sequence::new();
        ports
            .expect_outb()
            .with(eq(0x295), eq(0x40))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        ports
            .expect_outb()
            .with(eq(0x296), eq(0x01))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let transport = Transport::isa(0x290, Arc::new(ports));
        transport.write(0x40, 0x01).unwrap();
    }

    #[test]
    fn test_smbus_passes_address_through() {
        let mut bus = MockSmbusAdapter::new();
        bus.expect_read_byte_data()
            .with(eq(0x2d), eq(0x47))
            .returning(|_, _| Ok(0x50));
        bus.expect_write_byte_data()
            .with(eq(0x2d), eq(0x3b), eq(0x70))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let transport = Transport::smbus(0x2d, Arc::new(bus));
        assert_eq!(transport.read(0x47).unwrap(), 0x50);
        transport.write(0x3b, 0x70).unwrap();
    }

    #[test]
    fn test_smbus_error_propagates() {
        let mut bus = MockSmbusAdapter::new();
        bus.expect_read_byte_data()
            .returning(|_, _| Err(ChipmonError::transport("nack")));

        let transport = Transport::smbus(0x21, Arc::new(bus));
        assert!(transport.read(0x40).unwrap_err().is_transport());
    }

    /// Ports with a bare address latch. A data read returns the complement
    /// of whatever index was latched last, by any thread.
    struct LatchPorts {
        latch: AtomicU8,
    }

    impl PortIo for LatchPorts {
        fn inb(&self, port: u16) -> Result<u8> {
            assert_eq!(port, 0x296);
            Ok(!self.latch.load(Ordering::Relaxed))
        }

        fn outb(&self, port: u16, value: u8) -> Result<()> {
            if port == 0x295 {
                self.latch.store(value, Ordering::Relaxed);
                // Give other threads a chance to move the latch
                thread::yield_now();
            }
            Ok(())
        }
    }

    #[test]
    fn test_isa_index_and_data_are_not_interleaved() {
        let ports = Arc::new(LatchPorts {
            latch: AtomicU8::new(0),
        });
        let transport = Arc::new(IsaTransport::new(0x290, ports));

        let handles: Vec<_> = (0u8..8)
            .map(|n| {
                let transport = transport.clone();
                thread::spawn(move || {
                    let reg = 0x20 + n;
                    for _ in 0..2000 {
                        assert_eq!(transport.read(reg).unwrap(), !reg);
                        transport.write(reg, n).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_display() {
        let bus = Arc::new(MockSmbusAdapter::new());
        assert_eq!(Transport::smbus(0x2d, bus).to_string(), "smbus@0x2d");
        let ports = Arc::new(MockPortIo::new());
        assert_eq!(Transport::isa(0x290, ports).to_string(), "isa@0x0290");
    }
}
