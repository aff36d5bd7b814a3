//! Validation of driver configuration and probe addresses
//!
//! Values come from a user-editable JSON file, so everything is checked
//! before the driver touches hardware with it.

use crate::constants::{isa, smbus};
use crate::error::{ChipmonError, Result};

use super::config::DriverConfig;

/// Validates an ISA base address: 8-aligned and fully below 0x10000
pub fn validate_isa_base(base: u16) -> Result<u16> {
    if base % isa::EXTENT != 0 {
        return Err(ChipmonError::invalid_config(
            "isa_addresses",
            format!("0x{base:04x} is not aligned to {} ports", isa::EXTENT),
        ));
    }
    if base.checked_add(isa::EXTENT - 1).is_none() {
        return Err(ChipmonError::invalid_config(
            "isa_addresses",
            format!("0x{base:04x} extends past the end of I/O space"),
        ));
    }
    Ok(base)
}

/// Validates a 7-bit SMBus address
pub fn validate_smbus_address(address: u8) -> Result<u8> {
    if address > smbus::MAX_ADDRESS {
        return Err(ChipmonError::invalid_config(
            "smbus address",
            format!("0x{address:02x} is not a 7-bit address"),
        ));
    }
    Ok(address)
}

/// Validates a complete driver configuration
pub fn validate_config(config: &DriverConfig) -> Result<()> {
    if config.max_devices == 0 {
        return Err(ChipmonError::invalid_config("max_devices", "must be at least 1"));
    }
    if config.staleness_ms == 0 {
        return Err(ChipmonError::invalid_config("staleness_ms", "must be at least 1"));
    }

    validate_smbus_address(config.smbus_first_address)?;
    validate_smbus_address(config.smbus_last_address)?;
    if config.smbus_first_address > config.smbus_last_address {
        return Err(ChipmonError::invalid_config(
            "smbus_first_address",
            format!(
                "range 0x{:02x}..=0x{:02x} is empty",
                config.smbus_first_address, config.smbus_last_address
            ),
        ));
    }

    for &base in &config.isa_addresses {
        validate_isa_base(base)?;
    }

    Ok(())
}
