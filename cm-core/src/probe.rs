//! Discovery and attach
//!
//! ISA candidates are checked for the floating-bus signature and a matching
//! CHIPID; SMBus candidates must answer CONFIG and report CHIPID 0x20.
//! Accepting a chip acquires, in order, the port region (ISA only), a
//! registry slot, the device handle and its attribute registration. A
//! failure at any stage drops whatever was already acquired in reverse
//! order, and never aborts the scan of the remaining candidates.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channels::CHANNELS;
use crate::constants::{chip, isa, reg};
use crate::data::{DeviceAddress, TransportKind};
use crate::device::Device;
use crate::driver::{Attachment, Driver, IsaAdapter, SmbusBus};
use crate::error::{ChipmonError, Result};
use crate::hw::{PortIo, RegionClaim, SmbusAdapter, Transport};

/// Check for a W83781D at an ISA base address
pub fn detect_isa(ports: &dyn PortIo, base: u16) -> Result<bool> {
    for offset in isa::UNUSED_OFFSETS {
        let value = ports.inb(base + offset)?;
        if value != isa::FLOATING {
            debug!(base, offset, value, "Port does not float, no chip here");
            return Ok(false);
        }
    }

    let addr_port = base + isa::ADDR_REG_OFFSET;
    if ports.inb(addr_port)? == isa::FLOATING {
        ports.outb(addr_port, 0x00)?;
        if ports.inb(addr_port)? == isa::FLOATING {
            debug!(base, "Address register stuck at 0xff");
            return Ok(false);
        }
    }

    ports.outb(addr_port, reg::CHIPID)?;
    let id = ports.inb(base + isa::DATA_REG_OFFSET)?;
    Ok(id & chip::ISA_ID_MASK == chip::ID)
}

/// Check for a W83781D at an SMBus address. Any transfer failure means
/// nothing is there.
pub fn detect_smbus(bus: &dyn SmbusAdapter, address: u8) -> bool {
    if bus.read_byte_data(address, reg::CONFIG).is_err() {
        return false;
    }
    matches!(bus.read_byte_data(address, reg::CHIPID), Ok(id) if id == chip::ID)
}

/// Outcome of one probe pass
#[derive(Debug, Default)]
pub(crate) struct ProbeOutcome {
    pub attached: Vec<DeviceAddress>,
    pub last_error: Option<ChipmonError>,
}

impl ProbeOutcome {
    /// Devices found, or the last acceptance failure if nothing attached
    pub fn into_result(self) -> Result<Vec<DeviceAddress>> {
        match (self.attached.is_empty(), self.last_error) {
            (true, Some(err)) => Err(err),
            _ => Ok(self.attached),
        }
    }
}

impl Driver {
    pub(crate) fn probe_isa(&self, adapter: &IsaAdapter) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();

        for &base in &self.config().isa_addresses {
            let address = DeviceAddress::Isa {
                adapter: adapter.id,
                base,
            };
            if adapter.regions.is_reserved(base, isa::EXTENT) {
                debug!(base, "I/O region already claimed, skipping");
                continue;
            }
            match detect_isa(adapter.ports.as_ref(), base) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(base, error = %e, "ISA detection failed");
                    continue;
                }
            }
            info!(address = %address, "Detected {}", chip::DESCRIPTION);

            let attached = RegionClaim::acquire(adapter.regions.clone(), base, isa::EXTENT, chip::NAME)
                .and_then(|region| {
                    let transport = Transport::isa(base, adapter.ports.clone());
                    self.accept(address, transport, Some(region))
                });
            self.record(&mut outcome, address, attached);
        }

        outcome
    }

    pub(crate) fn probe_smbus(&self, adapter: &SmbusBus) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();

        for addr in self.config().smbus_addresses() {
            let address = DeviceAddress::Smbus {
                adapter: adapter.id,
                address: addr,
            };
            if self.registry().lookup_by_transport_identity(&address).is_ok() {
                debug!(address = %address, "Already attached, skipping");
                continue;
            }
            if !detect_smbus(adapter.bus.as_ref(), addr) {
                continue;
            }
            info!(address = %address, bus = %adapter.name, "Detected {}", chip::DESCRIPTION);

            let transport = Transport::smbus(addr, adapter.bus.clone());
            let attached = self.accept(address, transport, None);
            self.record(&mut outcome, address, attached);
        }

        outcome
    }

    fn record(&self, outcome: &mut ProbeOutcome, address: DeviceAddress, attached: Result<usize>) {
        match attached {
            Ok(slot) => {
                info!(address = %address, slot, "Attached device");
                outcome.attached.push(address);
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Failed to attach device");
                outcome.last_error = Some(e);
            }
        }
    }

    /// Bring an accepted chip up. On error every acquired resource has been
    /// released by the time this returns.
    fn accept(
        &self,
        address: DeviceAddress,
        transport: Transport,
        region: Option<RegionClaim>,
    ) -> Result<usize> {
        debug_assert_eq!(region.is_some(), address.kind() == TransportKind::Isa);

        let reservation = self.registry().allocate_slot()?;
        let device = Arc::new(Device::new(
            address,
            reservation.index(),
            transport,
            self.clock(),
            self.config().staleness_ms,
        ));
        if self.config().init_chip {
            device.init_chip()?;
        }
        let registration = self.sink().register(&device.name(), device.clone(), &CHANNELS)?;

        Ok(reservation.fill(Attachment {
            device,
            registration,
            region,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{MockPortIo, MockSmbusAdapter};
    use crate::sim::{SimulatedChip, SimulatedIsaBus};
    use mockall::predicate::eq;

    #[test]
    fn test_detect_isa_accepts_both_vid_variants() {
        for id in [0x20, 0x21] {
            let bus = SimulatedIsaBus::new();
            bus.attach(0x290, Arc::new(SimulatedChip::with_chip_id(id)));
            assert!(detect_isa(&bus, 0x290).unwrap(), "chipid 0x{id:02x}");
        }
    }

    #[test]
    fn test_detect_isa_rejects_other_ids() {
        let bus = SimulatedIsaBus::new();
        bus.attach(0x290, Arc::new(SimulatedChip::with_chip_id(0x30)));
        assert!(!detect_isa(&bus, 0x290).unwrap());
    }

    #[test]
    fn test_detect_isa_empty_bus() {
        let bus = SimulatedIsaBus::new();
        assert!(!detect_isa(&bus, 0x290).unwrap());
    }

    #[test]
    fn test_detect_isa_rejects_driven_unused_port() {
        let bus = SimulatedIsaBus::new();
        bus.attach(0x290, Arc::new(SimulatedChip::new()));
        bus.drive_port(0x297, 0x12);
        assert!(!detect_isa(&bus, 0x290).unwrap());
    }

    #[test]
    fn test_detect_isa_skips_address_reset_when_latch_is_clear() {
        let mut ports = MockPortIo::new();
        ports.expect_inb().with(eq(0x291)).returning(|_| Ok(0xff));
        ports.expect_inb().with(eq(0x292)).returning(|_| Ok(0xff));
        ports.expect_inb().with(eq(0x293)).returning(|_| Ok(0xff));
        ports.expect_inb().with(eq(0x297)).returning(|_| Ok(0xff));
        ports.expect_inb().with(eq(0x295)).times(1).returning(|_| Ok(0x40));
        ports
            .expect_outb()
            .with(eq(0x295), eq(reg::CHIPID))
            .times(1)
            .returning(|_, _| Ok(()));
        ports.expect_inb().with(eq(0x296)).returning(|_| Ok(0x20));

        assert!(detect_isa(&ports, 0x290).unwrap());
    }

    #[test]
    fn test_detect_isa_propagates_port_errors() {
        let mut ports = MockPortIo::new();
        ports
            .expect_inb()
            .returning(|_| Err(ChipmonError::transport("port io")));
        assert!(detect_isa(&ports, 0x290).is_err());
    }

    #[test]
    fn test_detect_smbus_requires_exact_id() {
        let mut bus = MockSmbusAdapter::new();
        bus.expect_read_byte_data()
            .with(eq(0x2d), eq(reg::CONFIG))
            .returning(|_, _| Ok(0x01));
        bus.expect_read_byte_data()
            .with(eq(0x2d), eq(reg::CHIPID))
            .returning(|_, _| Ok(0x21));
        assert!(!detect_smbus(&bus, 0x2d));
    }

    #[test]
    fn test_detect_smbus_config_failure_skips_chipid() {
        let mut bus = MockSmbusAdapter::new();
        bus.expect_read_byte_data()
            .with(eq(0x2d), eq(reg::CONFIG))
            .times(1)
            .returning(|_, _| Err(ChipmonError::transport("nack")));
        bus.expect_read_byte_data()
            .with(eq(0x2d), eq(reg::CHIPID))
            .never();
        assert!(!detect_smbus(&bus, 0x2d));
    }
}
