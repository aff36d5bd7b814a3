//! I/O port region bookkeeping
//!
//! An ISA chip owns eight consecutive ports from attach until detach. Claims
//! made by this process are tracked in memory; ranges already owned by other
//! drivers are read from `/proc/ioports` when a table is given.

use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ChipmonError, Result};

use super::transport::RegionReserver;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Claim {
    start: u16,
    end: u16,
    owner: String,
}

fn overlaps(a_start: u16, a_end: u16, b_start: u16, b_end: u16) -> bool {
    a_start <= b_end && b_start <= a_end
}

fn region_end(base: u16, extent: u16) -> u16 {
    base.saturating_add(extent.saturating_sub(1))
}

/// Parse `/proc/ioports` into (start, end, owner) triples.
///
/// Bridge windows ("PCI Bus ...") cover almost everything and are not claims
/// in their own right, so they are skipped.
pub fn parse_ioports(content: &str) -> Vec<(u16, u16, String)> {
    content
        .lines()
        .filter_map(|line| {
            let (range, owner) = line.trim().split_once(" : ")?;
            let owner = owner.trim();
            if owner.starts_with("PCI Bus") {
                return None;
            }
            let (start, end) = range.split_once('-')?;
            let start = u16::from_str_radix(start.trim(), 16).ok()?;
            let end = u16::from_str_radix(end.trim(), 16).ok()?;
            Some((start, end, owner.to_string()))
        })
        .collect()
}

/// Port region table for this process
#[derive(Debug, Default)]
pub struct RegionMap {
    claims: Mutex<Vec<Claim>>,
    external: Vec<Claim>,
}

impl RegionMap {
    /// Empty table with no external claims
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with the system's existing claims
    pub fn from_proc_ioports(path: &Path) -> Self {
        let external = match fs::read_to_string(path) {
            Ok(content) => parse_ioports(&content)
                .into_iter()
                .map(|(start, end, owner)| Claim { start, end, owner })
                .collect(),
            Err(e) => {
                warn!("Could not read {:?}: {}", path, e);
                Vec::new()
            }
        };
        debug!(claims = external.len(), "Loaded system I/O port claims");
        Self {
            claims: Mutex::new(Vec::new()),
            external,
        }
    }

    /// Owner of the claim covering `port`, if any
    pub fn owner_of(&self, port: u16) -> Option<String> {
        let claims = self.claims.lock();
        claims
            .iter()
            .chain(self.external.iter())
            .find(|c| c.start <= port && port <= c.end)
            .map(|c| c.owner.clone())
    }

    pub fn claim_count(&self) -> usize {
        self.claims.lock().len()
    }
}

impl RegionReserver for RegionMap {
    fn is_reserved(&self, base: u16, extent: u16) -> bool {
        let end = region_end(base, extent);
        let claims = self.claims.lock();
        claims
            .iter()
            .chain(self.external.iter())
            .any(|c| overlaps(base, end, c.start, c.end))
    }

    fn reserve(&self, base: u16, extent: u16, owner: &str) -> Result<()> {
        let end = region_end(base, extent);
        let mut claims = self.claims.lock();
        if claims
            .iter()
            .chain(self.external.iter())
            .any(|c| overlaps(base, end, c.start, c.end))
        {
            return Err(ChipmonError::RegionBusy { base, extent });
        }
        claims.push(Claim {
            start: base,
            end,
            owner: owner.to_string(),
        });
        Ok(())
    }

    fn release(&self, base: u16, extent: u16) {
        let end = region_end(base, extent);
        self.claims.lock().retain(|c| !(c.start == base && c.end == end));
    }
}

/// A held port region; released when dropped
pub struct RegionClaim {
    base: u16,
    extent: u16,
    reserver: Arc<dyn RegionReserver>,
}

impl RegionClaim {
    pub fn acquire(
        reserver: Arc<dyn RegionReserver>,
        base: u16,
        extent: u16,
        owner: &str,
    ) -> Result<Self> {
        reserver.reserve(base, extent, owner)?;
        Ok(Self {
            base,
            extent,
            reserver,
        })
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn extent(&self) -> u16 {
        self.extent
    }
}

impl Drop for RegionClaim {
    fn drop(&mut self) {
        debug!(base = self.base, extent = self.extent, "Releasing I/O region");
        self.reserver.release(self.base, self.extent);
    }
}

impl std::fmt::Debug for RegionClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegionClaim(0x{:04x}+{})", self.base, self.extent)
    }
}
