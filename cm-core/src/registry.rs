//! Fixed-capacity device registry
//!
//! Slots are handed out lowest-index first and never grow past the
//! configured capacity. Allocation returns a [`SlotReservation`]; the slot
//! only becomes occupied once the reservation is filled, and a reservation
//! dropped unfilled frees its slot again.

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::data::DeviceAddress;
use crate::error::{ChipmonError, Result};

/// Entries that carry a transport identity
pub trait Identified {
    fn identity(&self) -> DeviceAddress;
}

#[derive(Debug)]
enum Slot<T> {
    Free,
    Reserved,
    Occupied(T),
}

/// Slot table of capacity N
#[derive(Debug)]
pub struct Registry<T> {
    slots: RwLock<Vec<Slot<T>>>,
}

impl<T: Identified> Registry<T> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::Free).collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve the lowest free slot
    pub fn allocate_slot(&self) -> Result<SlotReservation<'_, T>> {
        let mut slots = self.slots.write();
        let capacity = slots.len();
        let Some(index) = slots.iter().position(|s| matches!(s, Slot::Free)) else {
            warn!(capacity, "Device registry is full");
            return Err(ChipmonError::CapacityExceeded { capacity });
        };
        slots[index] = Slot::Reserved;
        debug!(slot = index, "Reserved registry slot");
        Ok(SlotReservation {
            registry: self,
            index,
            filled: false,
        })
    }

    /// Free an occupied slot, handing its entry back
    pub fn release_slot(&self, index: usize) -> Option<T> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(index)?;
        match std::mem::replace(slot, Slot::Free) {
            Slot::Occupied(entry) => {
                debug!(slot = index, "Released registry slot");
                Some(entry)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Slot index of the entry with the given transport identity
    pub fn lookup_by_transport_identity(&self, address: &DeviceAddress) -> Result<usize> {
        self.slots
            .read()
            .iter()
            .position(|s| matches!(s, Slot::Occupied(e) if e.identity() == *address))
            .ok_or_else(|| ChipmonError::NotFound(address.to_string()))
    }

    /// Apply `f` to the entry in slot `index`, if occupied
    pub fn map_slot<R>(&self, index: usize, f: impl FnOnce(&T) -> R) -> Option<R> {
        match self.slots.read().get(index)? {
            Slot::Occupied(entry) => Some(f(entry)),
            _ => None,
        }
    }

    /// Apply `f` to every occupied slot, in index order
    pub fn map_occupied<R>(&self, mut f: impl FnMut(usize, &T) -> R) -> Vec<R> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Slot::Occupied(entry) => Some(f(i, entry)),
                _ => None,
            })
            .collect()
    }

    /// True when no slot is occupied or reserved
    pub fn is_idle(&self) -> bool {
        self.slots.read().iter().all(|s| matches!(s, Slot::Free))
    }

    fn free_reserved(&self, index: usize) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(index) {
            if matches!(slot, Slot::Reserved) {
                *slot = Slot::Free;
                debug!(slot = index, "Dropped unfilled slot reservation");
            }
        }
    }

    fn occupy(&self, index: usize, entry: T) {
        let mut slots = self.slots.write();
        slots[index] = Slot::Occupied(entry);
    }
}

/// A reserved but not yet occupied slot
pub struct SlotReservation<'a, T: Identified> {
    registry: &'a Registry<T>,
    index: usize,
    filled: bool,
}

impl<'a, T: Identified> SlotReservation<'a, T> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Occupy the slot with `entry`
    pub fn fill(mut self, entry: T) -> usize {
        self.registry.occupy(self.index, entry);
        self.filled = true;
        self.index
    }
}

impl<'a, T: Identified> Drop for SlotReservation<'a, T> {
    fn drop(&mut self) {
        if !self.filled {
            self.registry.free_reserved(self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AdapterId;

    #[derive(Debug, PartialEq)]
    struct Entry(u8);

    impl Identified for Entry {
        fn identity(&self) -> DeviceAddress {
            DeviceAddress::Smbus { adapter: AdapterId(0), address: self.0 }
        }
    }

    fn addr(address: u8) -> DeviceAddress {
        DeviceAddress::Smbus { adapter: AdapterId(0), address }
    }

    #[test]
    fn test_lowest_free_slot_first() {
        let registry = Registry::new(3);
        assert_eq!(registry.allocate_slot().unwrap().fill(Entry(0x20)), 0);
        assert_eq!(registry.allocate_slot().unwrap().fill(Entry(0x21)), 1);
        assert_eq!(registry.allocate_slot().unwrap().fill(Entry(0x22)), 2);

        assert_eq!(registry.release_slot(1), Some(Entry(0x21)));
        assert_eq!(registry.allocate_slot().unwrap().fill(Entry(0x23)), 1);
    }

    #[test]
    fn test_capacity_exceeded_leaves_existing_entries() {
        let registry = Registry::new(2);
        registry.allocate_slot().unwrap().fill(Entry(0x20));
        registry.allocate_slot().unwrap().fill(Entry(0x21));

        let err = registry.allocate_slot().err().unwrap();
        assert!(matches!(err, ChipmonError::CapacityExceeded { capacity: 2 }));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup_by_transport_identity(&addr(0x21)).unwrap(), 1);
    }

    #[test]
    fn test_unfilled_reservation_frees_slot() {
        let registry: Registry<Entry> = Registry::new(1);
        {
            let reservation = registry.allocate_slot().unwrap();
            assert_eq!(reservation.index(), 0);
            assert!(!registry.is_idle());
            assert!(registry.allocate_slot().is_err());
        }
        assert!(registry.is_idle());
        assert!(registry.allocate_slot().is_ok());
    }

    #[test]
    fn test_lookup_not_found() {
        let registry: Registry<Entry> = Registry::new(2);
        assert!(matches!(
            registry.lookup_by_transport_identity(&addr(0x2d)),
            Err(ChipmonError::NotFound(_))
        ));
    }

    #[test]
    fn test_release_free_slot_is_none() {
        let registry: Registry<Entry> = Registry::new(2);
        assert_eq!(registry.release_slot(0), None);
        assert_eq!(registry.release_slot(9), None);
    }

    #[test]
    fn test_release_keeps_reservations() {
        let registry: Registry<Entry> = Registry::new(1);
        let reservation = registry.allocate_slot().unwrap();
        assert_eq!(registry.release_slot(0), None);
        assert_eq!(reservation.fill(Entry(0x20)), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_map_helpers() {
        let registry = Registry::new(3);
        registry.allocate_slot().unwrap().fill(Entry(0x20));
        registry.allocate_slot().unwrap().fill(Entry(0x2d));

        assert_eq!(registry.map_slot(1, |e| e.0), Some(0x2d));
        assert_eq!(registry.map_slot(2, |e| e.0), None);
        assert_eq!(registry.map_occupied(|i, e| (i, e.0)), vec![(0, 0x20), (1, 0x2d)]);
    }
}
