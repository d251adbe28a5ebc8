//! # Patcher
//!
//! This module covers patchers, which are used to overwrite and restore code in live memory

pub mod atomic;
pub mod cache;
pub mod mem;
pub mod restore;

use region::Protection;

/// Options shared by everything that writes to a patch site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Protection granted to the pages covering a patch site while it's being written.
    ///
    /// Other code on the same pages keeps running during the write, so this normally includes
    /// [`Protection::EXECUTE`].
    pub write_protection: Protection,
}
impl PatchOptions {
    /// Creates the default options
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the protection used while writing
    pub fn with_write_protection(mut self, protection: Protection) -> Self {
        self.write_protection = protection;
        self
    }
}
impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            write_protection: Protection::READ_WRITE_EXECUTE,
        }
    }
}

/// All patchers save state from where they patched and are able to revert on-command
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that the implementation of `patch` works correctly and is properly documented for avoiding undefined behavior
pub unsafe trait Patcher {
    /// Error type that can occur when patching
    type Error;
    /// Handle for the patch, used to put the original bytes back
    type Guard<'a>: PatchGuard + 'a
    where
        Self: 'a;

    /// Patches a given location.
    ///
    /// # Safety
    ///
    /// This function is intended to be used on arbitrary memory addresses, but must be valid for the supplied patcher
    unsafe fn patch<'a>(
        &'a self,
        target: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error>;
}

/// Handle for a patch
///
/// Unlike hook guards, dropping a patch handle keeps the patch in place.
pub trait PatchGuard: Sized {
    /// Error type that can occur when restoring
    type Error;

    /// Address of the patched location
    fn location(&self) -> *const u8;

    /// Restores the original value of a patch
    fn restore(self) -> Result<(), Self::Error>;
}
