//! Driver state
//!
//! Owns the device registry and the attribute sink for all chips it has
//! attached. Probing and detaching are serialised by the probe lock; device
//! lookups only take the registry's read lock.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::attributes::{AttributeSink, RegistrationId};
use crate::cache::{Clock, MonotonicClock};
use crate::data::{validate_config, AdapterId, DeviceAddress, DriverConfig};
use crate::device::Device;
use crate::error::Result;
use crate::hw::{PortIo, RegionClaim, RegionReserver, SmbusAdapter};
use crate::registry::{Identified, Registry};

/// An ISA bus: raw port access plus the region table guarding it
#[derive(Clone)]
pub struct IsaAdapter {
    pub id: AdapterId,
    pub ports: Arc<dyn PortIo>,
    pub regions: Arc<dyn RegionReserver>,
}

/// An SMBus adapter
#[derive(Clone)]
pub struct SmbusBus {
    pub id: AdapterId,
    pub bus: Arc<dyn SmbusAdapter>,
    pub name: String,
}

/// A bus the driver can probe
#[derive(Clone)]
pub enum Adapter {
    Isa(IsaAdapter),
    Smbus(SmbusBus),
}

impl Adapter {
    pub fn id(&self) -> AdapterId {
        match self {
            Self::Isa(a) => a.id,
            Self::Smbus(a) => a.id,
        }
    }
}

/// A live device with everything acquired for it. Fields drop in
/// declaration order, so the port region is released last.
pub struct Attachment {
    pub(crate) device: Arc<Device>,
    pub(crate) registration: RegistrationId,
    pub(crate) region: Option<RegionClaim>,
}

impl Identified for Attachment {
    fn identity(&self) -> DeviceAddress {
        self.device.address()
    }
}

pub struct Driver {
    config: DriverConfig,
    registry: Registry<Attachment>,
    sink: Arc<dyn AttributeSink>,
    clock: Arc<dyn Clock>,
    probe_lock: Mutex<()>,
}

impl Driver {
    /// Create driver state with a monotonic clock
    pub fn new(config: DriverConfig, sink: Arc<dyn AttributeSink>) -> Result<Self> {
        Self::with_clock(config, sink, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        config: DriverConfig,
        sink: Arc<dyn AttributeSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_config(&config)?;
        debug!(capacity = config.max_devices, staleness_ms = config.staleness_ms, "Driver initialised");
        Ok(Self {
            registry: Registry::new(config.max_devices),
            config,
            sink,
            clock,
            probe_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Registry<Attachment> {
        &self.registry
    }

    pub(crate) fn sink(&self) -> &dyn AttributeSink {
        self.sink.as_ref()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Scan an adapter and attach every chip found.
    ///
    /// Returns the addresses attached by this call. If nothing was attached
    /// and at least one acceptance failed, that failure is returned instead.
    pub fn probe(&self, adapter: &Adapter) -> Result<Vec<DeviceAddress>> {
        let _guard = self.probe_lock.lock();
        let outcome = match adapter {
            Adapter::Isa(isa) => self.probe_isa(isa),
            Adapter::Smbus(bus) => self.probe_smbus(bus),
        };
        debug!(adapter = %adapter.id(), attached = outcome.attached.len(), "Probe finished");
        outcome.into_result()
    }

    /// Adapter arrival notification
    pub fn attach_adapter(&self, adapter: &Adapter) -> Result<Vec<DeviceAddress>> {
        info!(adapter = %adapter.id(), "Adapter attached");
        self.probe(adapter)
    }

    /// Detach one device: deregister its attributes, free its slot, then
    /// release its port region
    pub fn detach(&self, address: &DeviceAddress) -> Result<()> {
        let _guard = self.probe_lock.lock();
        self.detach_locked(address)
    }

    fn detach_locked(&self, address: &DeviceAddress) -> Result<()> {
        let slot = self.registry.lookup_by_transport_identity(address)?;
        if let Some(registration) = self.registry.map_slot(slot, |a| a.registration) {
            self.sink.deregister(registration);
        }
        if let Some(attachment) = self.registry.release_slot(slot) {
            let Attachment { device, region, .. } = attachment;
            drop(device);
            drop(region);
        }
        info!(address = %address, slot, "Detached device");
        Ok(())
    }

    /// Adapter removal notification; detaches every device on it
    pub fn detach_adapter(&self, id: AdapterId) -> usize {
        let _guard = self.probe_lock.lock();
        let addresses: Vec<DeviceAddress> = self
            .registry
            .map_occupied(|_, a| a.identity())
            .into_iter()
            .filter(|addr| addr.adapter() == id)
            .collect();
        let mut detached = 0;
        for address in &addresses {
            if self.detach_locked(address).is_ok() {
                detached += 1;
            }
        }
        info!(adapter = %id, detached, "Adapter removed");
        detached
    }

    /// Detach everything
    pub fn teardown(&self) {
        let _guard = self.probe_lock.lock();
        let addresses = self.registry.map_occupied(|_, a| a.identity());
        for address in &addresses {
            // Lookups cannot fail while the probe lock is held
            let _ = self.detach_locked(address);
        }
    }

    pub fn device(&self, slot: usize) -> Option<Arc<Device>> {
        self.registry.map_slot(slot, |a| a.device.clone())
    }

    pub fn device_by_address(&self, address: &DeviceAddress) -> Result<Arc<Device>> {
        let slot = self.registry.lookup_by_transport_identity(address)?;
        self.device(slot)
            .ok_or_else(|| crate::error::ChipmonError::NotFound(address.to_string()))
    }

    /// All attached devices in slot order
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.registry.map_occupied(|_, a| a.device.clone())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// True when no slot is occupied or mid-acceptance
    pub fn is_idle(&self) -> bool {
        self.registry.is_idle()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeTable, MockAttributeSink};
    use crate::cache::ManualClock;
    use crate::channels::ChannelId;
    use crate::constants::{bank, reg};
    use crate::error::ChipmonError;
    use crate::hw::{MockRegionReserver, RegionMap};
    use crate::sim::{SimulatedChip, SimulatedIsaBus, SimulatedSmbus};

    struct Rig {
        driver: Driver,
        table: Arc<AttributeTable>,
        regions: Arc<RegionMap>,
        isa: Adapter,
        isa_chip: Arc<SimulatedChip>,
        smbus: Adapter,
        smbus_sim: Arc<SimulatedSmbus>,
    }

    fn rig(config: DriverConfig) -> Rig {
        let table = Arc::new(AttributeTable::new(16));
        let driver =
            Driver::with_clock(config, table.clone(), Arc::new(ManualClock::new(0))).unwrap();

        let isa_bus = Arc::new(SimulatedIsaBus::new());
        let isa_chip = Arc::new(SimulatedChip::new());
        isa_bus.attach(0x290, isa_chip.clone());
        let regions = Arc::new(RegionMap::new());
        let isa = Adapter::Isa(IsaAdapter {
            id: AdapterId(0),
            ports: isa_bus,
            regions: regions.clone(),
        });

        let smbus_sim = Arc::new(SimulatedSmbus::new());
        let smbus = Adapter::Smbus(SmbusBus {
            id: AdapterId(1),
            bus: smbus_sim.clone(),
            name: "sim-smbus".into(),
        });

        Rig {
            driver,
            table,
            regions,
            isa,
            isa_chip,
            smbus,
            smbus_sim,
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DriverConfig { max_devices: 0, ..DriverConfig::default() };
        let sink = Arc::new(AttributeTable::new(4));
        assert!(Driver::new(config, sink).is_err());
    }

    #[test]
    fn test_isa_probe_attaches_and_claims_region() {
        let rig = rig(DriverConfig::default());
        let attached = rig.driver.probe(&rig.isa).unwrap();

        assert_eq!(attached, vec![DeviceAddress::Isa { adapter: AdapterId(0), base: 0x290 }]);
        assert!(rig.regions.is_reserved(0x290, 8));
        assert_eq!(rig.regions.owner_of(0x290).as_deref(), Some("w83781d"));
        assert_eq!(rig.table.chips(), vec!["w83781d-isa-0290".to_string()]);
        // Init sequence ran
        assert_eq!(rig.isa_chip.reg(reg::TEMP_OVER), 60);
        assert_eq!(rig.isa_chip.bank(), bank::DEFAULT);
    }

    #[test]
    fn test_isa_probe_is_idempotent() {
        let rig = rig(DriverConfig::default());
        rig.driver.probe(&rig.isa).unwrap();
        // Region now reserved by us, so the second pass skips it
        assert!(rig.driver.probe(&rig.isa).unwrap().is_empty());
        assert_eq!(rig.driver.len(), 1);
    }

    #[test]
    fn test_smbus_probe_attaches_each_chip_once() {
        let rig = rig(DriverConfig::default());
        rig.smbus_sim.attach(0x2d, Arc::new(SimulatedChip::new()));
        rig.smbus_sim.attach(0x2a, Arc::new(SimulatedChip::new()));
        rig.smbus_sim.attach(0x28, Arc::new(SimulatedChip::with_chip_id(0x21)));
        rig.smbus_sim.attach(0x40, Arc::new(SimulatedChip::new()));

        let attached = rig.driver.probe(&rig.smbus).unwrap();
        assert_eq!(
            attached,
            vec![
                DeviceAddress::Smbus { adapter: AdapterId(1), address: 0x2a },
                DeviceAddress::Smbus { adapter: AdapterId(1), address: 0x2d },
            ]
        );
        assert!(rig.driver.probe(&rig.smbus).unwrap().is_empty());
        assert_eq!(rig.driver.len(), 2);
    }

    #[test]
    fn test_capacity_exceeded_keeps_first_devices() {
        let rig = rig(DriverConfig { max_devices: 2, ..DriverConfig::default() });
        for addr in [0x20, 0x21, 0x22] {
            rig.smbus_sim.attach(addr, Arc::new(SimulatedChip::new()));
        }

        let attached = rig.driver.probe(&rig.smbus).unwrap();
        assert_eq!(attached.len(), 2);
        assert_eq!(rig.driver.len(), 2);
        assert_eq!(rig.driver.device(0).unwrap().slot(), 0);
        assert_eq!(rig.driver.device(1).unwrap().slot(), 1);

        // Nothing new fits: the capacity error surfaces
        let err = rig.driver.probe(&rig.smbus).unwrap_err();
        assert!(matches!(err, ChipmonError::CapacityExceeded { capacity: 2 }));
    }

    #[test]
    fn test_detach_then_reprobe_reuses_slot() {
        let rig = rig(DriverConfig { max_devices: 2, ..DriverConfig::default() });
        rig.smbus_sim.attach(0x20, Arc::new(SimulatedChip::new()));
        rig.smbus_sim.attach(0x21, Arc::new(SimulatedChip::new()));
        rig.driver.probe(&rig.smbus).unwrap();

        let first = DeviceAddress::Smbus { adapter: AdapterId(1), address: 0x20 };
        rig.driver.detach(&first).unwrap();
        assert_eq!(rig.driver.len(), 1);
        assert_eq!(rig.table.len(), 1);

        assert_eq!(rig.driver.probe(&rig.smbus).unwrap(), vec![first]);
        assert_eq!(rig.driver.device_by_address(&first).unwrap().slot(), 0);
    }

    #[test]
    fn test_detach_unknown_is_not_found() {
        let rig = rig(DriverConfig::default());
        let addr = DeviceAddress::Smbus { adapter: AdapterId(1), address: 0x2d };
        assert!(matches!(rig.driver.detach(&addr), Err(ChipmonError::NotFound(_))));
    }

    #[test]
    fn test_isa_detach_releases_region() {
        let rig = rig(DriverConfig::default());
        rig.driver.probe(&rig.isa).unwrap();
        let addr = DeviceAddress::Isa { adapter: AdapterId(0), base: 0x290 };
        rig.driver.detach(&addr).unwrap();

        assert!(!rig.regions.is_reserved(0x290, 8));
        assert!(rig.table.is_empty());
        assert!(rig.driver.is_idle());
    }

    #[test]
    fn test_detach_adapter_only_touches_that_adapter() {
        let rig = rig(DriverConfig::default());
        rig.smbus_sim.attach(0x2d, Arc::new(SimulatedChip::new()));
        rig.driver.probe(&rig.isa).unwrap();
        rig.driver.probe(&rig.smbus).unwrap();

        assert_eq!(rig.driver.detach_adapter(AdapterId(1)), 1);
        assert_eq!(rig.driver.len(), 1);
        assert!(rig.regions.is_reserved(0x290, 8));
        assert_eq!(rig.driver.detach_adapter(AdapterId(0)), 1);
        assert!(!rig.regions.is_reserved(0x290, 8));
    }

    #[test]
    fn test_failure_at_region_reservation_unwinds() {
        let table = Arc::new(AttributeTable::new(4));
        let driver = Driver::with_clock(
            DriverConfig::default(),
            table.clone(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let isa_bus = Arc::new(SimulatedIsaBus::new());
        isa_bus.attach(0x290, Arc::new(SimulatedChip::new()));

        // Someone else grabs the region between the check and the claim
        let mut regions = MockRegionReserver::new();
        regions.expect_is_reserved().returning(|_, _| false);
        regions
            .expect_reserve()
            .returning(|base, extent, _| Err(ChipmonError::RegionBusy { base, extent }));
        regions.expect_release().never();

        let adapter = Adapter::Isa(IsaAdapter {
            id: AdapterId(0),
            ports: isa_bus,
            regions: Arc::new(regions),
        });
        let err = driver.probe(&adapter).unwrap_err();
        assert!(matches!(err, ChipmonError::RegionBusy { base: 0x290, .. }));
        assert!(driver.is_idle());
        assert!(table.is_empty());
    }

    #[test]
    fn test_failure_at_slot_allocation_unwinds() {
        let rig = rig(DriverConfig { max_devices: 1, ..DriverConfig::default() });
        rig.smbus_sim.attach(0x2d, Arc::new(SimulatedChip::new()));
        rig.driver.probe(&rig.smbus).unwrap();

        let err = rig.driver.probe(&rig.isa).unwrap_err();
        assert!(matches!(err, ChipmonError::CapacityExceeded { .. }));
        assert!(!rig.regions.is_reserved(0x290, 8));
        assert_eq!(rig.table.len(), 1);
    }

    #[test]
    fn test_failure_at_init_unwinds() {
        let rig = rig(DriverConfig::default());
        rig.isa_chip.fail_writes(true);

        assert!(rig.driver.probe(&rig.isa).unwrap_err().is_transport());
        assert!(!rig.regions.is_reserved(0x290, 8));
        assert!(rig.driver.is_idle());
        assert!(rig.table.is_empty());

        // Recovers once the chip behaves
        rig.isa_chip.fail_writes(false);
        assert_eq!(rig.driver.probe(&rig.isa).unwrap().len(), 1);
    }

    #[test]
    fn test_failure_at_registration_unwinds() {
        let mut sink = MockAttributeSink::new();
        sink.expect_register()
            .returning(|_, _, _| Err(ChipmonError::AllocationFailure("full".into())));
        sink.expect_deregister().never();

        let driver = Driver::with_clock(
            DriverConfig::default(),
            Arc::new(sink),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let isa_bus = Arc::new(SimulatedIsaBus::new());
        isa_bus.attach(0x290, Arc::new(SimulatedChip::new()));
        let regions = Arc::new(RegionMap::new());
        let adapter = Adapter::Isa(IsaAdapter {
            id: AdapterId(0),
            ports: isa_bus,
            regions: regions.clone(),
        });

        let err = driver.probe(&adapter).unwrap_err();
        assert!(matches!(err, ChipmonError::AllocationFailure(_)));
        assert!(!regions.is_reserved(0x290, 8));
        assert!(driver.is_idle());
    }

    #[test]
    fn test_init_can_be_disabled() {
        let rig = rig(DriverConfig { init_chip: false, ..DriverConfig::default() });
        rig.driver.probe(&rig.isa).unwrap();
        assert_eq!(rig.isa_chip.write_count(), 0);
        assert_eq!(rig.isa_chip.reg(reg::TEMP_OVER), 0);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let rig = rig(DriverConfig::default());
        rig.smbus_sim.attach(0x2d, Arc::new(SimulatedChip::new()));
        rig.driver.probe(&rig.isa).unwrap();
        rig.driver.probe(&rig.smbus).unwrap();

        rig.driver.teardown();
        assert!(rig.driver.is_idle());
        assert!(rig.table.is_empty());
        assert_eq!(rig.regions.claim_count(), 0);
    }

    #[test]
    fn test_channels_through_driver() {
        let rig = rig(DriverConfig::default());
        rig.driver.probe(&rig.isa).unwrap();
        let dev = rig.driver.device(0).unwrap();

        let temp = dev.read_channel_values(ChannelId::Temp(1)).unwrap();
        assert_eq!(temp, vec![600, 500, 450]);
        assert_eq!(rig.table.read("w83781d-isa-0290/fan_div").unwrap(), vec![2, 2, 2]);
    }
}
