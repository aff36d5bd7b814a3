//! Attribute registration
//!
//! Attached devices publish their channels through an [`AttributeSink`].
//! The in-memory [`AttributeTable`] is the sink used by the command line
//! tool; it resolves paths such as `w83781d-isa-0290/in0` to a device and
//! channel.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::channels::{ChannelDecl, ChannelId};
use crate::device::Device;
use crate::error::{ChipmonError, Result};

/// Handle returned by a sink for later deregistration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegistrationId(pub u64);

/// Registration point for device channels
#[cfg_attr(test, mockall::automock)]
pub trait AttributeSink: Send + Sync {
    fn register(
        &self,
        name: &str,
        device: Arc<Device>,
        channels: &'static [ChannelDecl],
    ) -> Result<RegistrationId>;

    fn deregister(&self, id: RegistrationId);
}

struct Registration {
    name: String,
    device: Arc<Device>,
    channels: &'static [ChannelDecl],
}

/// In-memory attribute table with a bounded number of registrations
pub struct AttributeTable {
    entries: RwLock<BTreeMap<RegistrationId, Registration>>,
    next_id: AtomicU64,
    max_entries: usize,
}

/// One row of [`AttributeTable::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeEntry {
    pub path: String,
    pub magnitude: u8,
    pub values: usize,
    pub writable: bool,
}

impl AttributeTable {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Names of the registered chips
    pub fn chips(&self) -> Vec<String> {
        self.entries.read().values().map(|r| r.name.clone()).collect()
    }

    /// Resolve `chip/channel` to a device and channel id
    pub fn lookup(&self, path: &str) -> Result<(Arc<Device>, ChannelId)> {
        let (chip, channel) = path
            .split_once('/')
            .ok_or_else(|| ChipmonError::InvalidChannel(path.to_string()))?;
        let entries = self.entries.read();
        let reg = entries
            .values()
            .find(|r| r.name == chip)
            .ok_or_else(|| ChipmonError::NotFound(chip.to_string()))?;
        let decl = reg
            .channels
            .iter()
            .find(|c| c.name == channel)
            .ok_or_else(|| ChipmonError::InvalidChannel(path.to_string()))?;
        Ok((reg.device.clone(), decl.id))
    }

    pub fn read(&self, path: &str) -> Result<Vec<i64>> {
        let (device, id) = self.lookup(path)?;
        device.read_channel_values(id)
    }

    pub fn write(&self, path: &str, values: &[i64]) -> Result<()> {
        let (device, id) = self.lookup(path)?;
        device.write_channel(id, values)
    }

    /// Every registered attribute, sorted by registration
    pub fn list(&self) -> Vec<AttributeEntry> {
        self.entries
            .read()
            .values()
            .flat_map(|reg| {
                reg.channels.iter().map(move |c| AttributeEntry {
                    path: format!("{}/{}", reg.name, c.name),
                    magnitude: c.magnitude,
                    values: c.values,
                    writable: c.writable > 0,
                })
            })
            .collect()
    }
}

impl AttributeSink for AttributeTable {
    fn register(
        &self,
        name: &str,
        device: Arc<Device>,
        channels: &'static [ChannelDecl],
    ) -> Result<RegistrationId> {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries {
            return Err(ChipmonError::AllocationFailure(format!(
                "attribute table full ({} entries)",
                self.max_entries
            )));
        }
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.insert(
            id,
            Registration {
                name: name.to_string(),
                device,
                channels,
            },
        );
        info!(chip = name, channels = channels.len(), "Registered attributes");
        Ok(id)
    }

    fn deregister(&self, id: RegistrationId) {
        if let Some(reg) = self.entries.write().remove(&id) {
            debug!(chip = %reg.name, "Deregistered attributes");
        }
    }
}
