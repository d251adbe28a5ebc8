//! # Error
//!
//! Errors shared by encoders, patchers and hooks

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors that can occur while patching, locking or restoring a patch site
#[derive(Debug, Error)]
pub enum PatchError {
    /// The requested capability can't be provided soundly on this architecture
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
    /// Storage for the restore point couldn't be obtained
    #[error("Unable to allocate restore point storage")]
    AllocationError(#[from] TryReserveError),
    /// The patch site is not mapped or not readable
    #[error("Patch site {addr:#x} ({len} bytes) is not readable")]
    AccessError {
        /// Start of the patch site
        addr: usize,
        /// Length of the patch site
        len: usize,
    },
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    ProtectionError(#[from] region::Error),
}
