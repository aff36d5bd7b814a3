//! chipmon core library
//!
//! Driver for the Winbond W83781D hardware monitor, reachable over the ISA
//! port pair or SMBus.
//!
//! # Features
//!
//! - **Discovery**: ISA and SMBus probing with ordered unwind on failure
//! - **Cached updates**: one register batch per staleness window, shared by
//!   all concurrent readers
//! - **Channels**: voltages, fans, temperatures, VID, divisors and alarms in
//!   fixed-point units
//! - **Simulation**: register-level chip model for tests and dry runs
//!
//! # Module Structure
//!
//! - `hw/` - Register transports and port region bookkeeping
//! - `data/` - Identity types, snapshot, configuration, validation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cm_core::{Adapter, AttributeTable, Driver, DriverConfig, SmbusBus, AdapterId};
//! use cm_core::sim::{SimulatedChip, SimulatedSmbus};
//!
//! let bus = Arc::new(SimulatedSmbus::new());
//! bus.attach(0x2d, Arc::new(SimulatedChip::new()));
//!
//! let table = Arc::new(AttributeTable::new(16));
//! let driver = Driver::new(DriverConfig::default(), table.clone()).unwrap();
//! driver
//!     .probe(&Adapter::Smbus(SmbusBus { id: AdapterId(0), bus, name: "sim".into() }))
//!     .unwrap();
//! let in2 = table.read("w83781d-i2c-0-2d/in2").unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod hw;

// Standalone modules
pub mod attributes;
pub mod cache;
pub mod channels;
pub mod constants;
pub mod convert;
pub mod device;
pub mod driver;
pub mod error;
pub mod probe;
pub mod registry;
pub mod report;
pub mod sim;

// Re-export primary types from data/
pub use data::{AdapterId, DeviceAddress, RawSnapshot, TransportKind};

// Re-export config functions from data/
pub use data::{config_path, load_config, load_config_from, save_config, DriverConfig};

// Re-export validation functions from data/
pub use data::{validate_config, validate_isa_base, validate_smbus_address};

// Re-export error types
pub use error::{ChipmonError, Result};

// Re-export hardware types
pub use hw::{PortIo, RegionClaim, RegionMap, RegionReserver, SmbusAdapter, Transport};
#[cfg(target_os = "linux")]
pub use hw::{DevPort, I2cDevBus};

pub use attributes::{AttributeEntry, AttributeSink, AttributeTable, RegistrationId};
pub use cache::{Clock, ManualClock, MonotonicClock};
pub use channels::{ChannelDecl, ChannelId, CHANNELS};
pub use device::Device;
pub use driver::{Adapter, Driver, IsaAdapter, SmbusBus};
pub use probe::{detect_isa, detect_smbus};
pub use registry::{Identified, Registry, SlotReservation};
pub use report::{capture_device, capture_driver, format_fixed, report_to_json, ChannelReading, DeviceReport, DriverReport};
