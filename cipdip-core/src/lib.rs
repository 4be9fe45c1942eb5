//! CIPDIP Core Library
//!
//! Shared types, the error taxonomy and the link-layer interface handle used
//! by the capture replay workspace.

pub mod error;
pub mod interface;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use interface::Interface;
pub use types::*;
