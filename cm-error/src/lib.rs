//! Unified error handling for chipmon
//!
//! A single error type shared by the driver core and the command line tool.
//! It uses thiserror for the Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using ChipmonError
pub type Result<T> = std::result::Result<T, ChipmonError>;

/// Unified error type for all chipmon operations
#[derive(thiserror::Error, Debug)]
pub enum ChipmonError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("I/O region 0x{base:04x} (extent {extent}) is already in use")]
    RegionBusy {
        base: u16,
        extent: u16,
    },

    #[error("No free device slot (capacity {capacity})")]
    CapacityExceeded {
        capacity: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    // ============================================================================
    // Attribute Errors
    // ============================================================================
    #[error("Unknown channel: {0}")]
    InvalidChannel(String),

    #[error("Channel {0} is read-only")]
    ReadOnlyChannel(String),

    #[error("Invalid fan divisor: {0} (must be 1, 4 or 8)")]
    InvalidDivisor(i64),

    #[error("Value buffer too small: need {needed}, got {got}")]
    BufferTooSmall {
        needed: usize,
        got: usize,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Permission Errors
    // ============================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl ChipmonError {
    /// Create a transport failure from anything displayable
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportFailure(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean "nothing answered at this address" during a scan
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_busy_message() {
        let err = ChipmonError::RegionBusy { base: 0x290, extent: 8 };
        assert_eq!(err.to_string(), "I/O region 0x0290 (extent 8) is already in use");
    }

    #[test]
    fn test_capacity_message() {
        let err = ChipmonError::CapacityExceeded { capacity: 4 };
        assert!(err.to_string().contains("capacity 4"));
    }

    #[test]
    fn test_is_transport() {
        assert!(ChipmonError::transport("nack").is_transport());
        assert!(!ChipmonError::NotFound("x".into()).is_transport());
    }

    #[test]
    fn test_file_read_keeps_source() {
        use std::error::Error;
        let err = ChipmonError::FileRead {
            path: PathBuf::from("/etc/chipmon/config.json"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/etc/chipmon/config.json"));
        assert!(err.source().is_some());
    }
}
