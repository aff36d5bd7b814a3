//! Linux backends for the register transports
//!
//! Port I/O goes through `/dev/port` (offset = port number); SMBus goes
//! through the i2c-dev character devices.

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ChipmonError, Result};

use super::transport::{PortIo, SmbusAdapter};

/// Port access through the `/dev/port` character device (requires root)
pub struct DevPort {
    file: File,
}

impl DevPort {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    ChipmonError::PermissionDenied(format!("{}: {}", path.display(), e))
                }
                _ => ChipmonError::FileRead {
                    path: path.to_path_buf(),
                    source: e,
                },
            })?;
        debug!("Opened port device {:?}", path);
        Ok(Self { file })
    }
}

impl PortIo for DevPort {
    fn inb(&self, port: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.file
            .read_exact_at(&mut buf, u64::from(port))
            .map_err(|e| ChipmonError::transport(format!("inb 0x{port:04x}: {e}")))?;
        Ok(buf[0])
    }

    fn outb(&self, port: u16, value: u8) -> Result<()> {
        self.file
            .write_all_at(&[value], u64::from(port))
            .map_err(|e| ChipmonError::transport(format!("outb 0x{port:04x}: {e}")))
    }
}

/// One `/dev/i2c-N` adapter. Handles are opened per slave address on first
/// use and kept for later transfers.
pub struct I2cDevBus {
    path: PathBuf,
    devices: Mutex<HashMap<u8, LinuxI2CDevice>>,
}

impl I2cDevBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_device<T>(
        &self,
        address: u8,
        f: impl FnOnce(&mut LinuxI2CDevice) -> Result<T>,
    ) -> Result<T> {
        let mut devices = self.devices.lock();
        let device = match devices.entry(address) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let dev = LinuxI2CDevice::new(&self.path, u16::from(address)).map_err(|err| {
                    ChipmonError::transport(format!(
                        "{} address 0x{address:02x}: {err}",
                        self.path.display()
                    ))
                })?;
                e.insert(dev)
            }
        };
        f(device)
    }
}

impl SmbusAdapter for I2cDevBus {
    fn read_byte_data(&self, address: u8, reg: u8) -> Result<u8> {
        self.with_device(address, |dev| {
            dev.smbus_read_byte_data(reg)
                .map_err(|e| ChipmonError::transport(format!("read 0x{address:02x}/0x{reg:02x}: {e}")))
        })
    }

    fn write_byte_data(&self, address: u8, reg: u8, value: u8) -> Result<()> {
        self.with_device(address, |dev| {
            dev.smbus_write_byte_data(reg, value)
                .map_err(|e| ChipmonError::transport(format!("write 0x{address:02x}/0x{reg:02x}: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_port_missing_device() {
        assert!(DevPort::open(Path::new("/nonexistent/port")).is_err());
    }

    #[test]
    fn test_i2c_missing_adapter_is_transport_error() {
        let bus = I2cDevBus::new("/nonexistent/i2c-9");
        let err = bus.read_byte_data(0x2d, 0x58).unwrap_err();
        assert!(err.is_transport());
    }
}
