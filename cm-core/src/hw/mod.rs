//! Hardware access modules
//!
//! Register transports, port region bookkeeping, and the Linux backends
//! behind them.

#[cfg(target_os = "linux")]
mod linux;
mod region;
mod transport;

#[cfg(target_os = "linux")]
pub use linux::{DevPort, I2cDevBus};
pub use region::{parse_ioports, RegionClaim, RegionMap};
pub use transport::{IsaTransport, PortIo, RegionReserver, SmbusAdapter, SmbusTransport, Transport};

#[cfg(test)]
pub use transport::{MockPortIo, MockRegionReserver, MockSmbusAdapter};
