//! Data types, configuration, and validation modules
//!
//! Identity and snapshot types shared by the driver, plus the persisted
//! driver configuration.

mod config;
mod types;
mod validation;

pub use config::{config_path, load_config, load_config_from, save_config, DriverConfig};
pub use types::{AdapterId, DeviceAddress, RawSnapshot, TransportKind};
pub use validation::{validate_config, validate_isa_base, validate_smbus_address};
