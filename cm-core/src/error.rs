//! Error types, shared with the command line crate
pub use cm_error::{ChipmonError, Result};
