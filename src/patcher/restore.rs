//! This module contains restore points, the saved original bytes of a patch site

use std::fmt;
use std::ptr;

use log::debug;
use region::Protection;

use super::atomic::write_lock_step;
use super::{PatchGuard, PatchOptions};
use crate::error::PatchError;

/// Original bytes of a patch site, captured before the site was written.
///
/// Restoring consumes the restore point. Dropping it without restoring keeps the patch in place
/// for good.
#[must_use = "dropping a restore point makes the patch permanent"]
pub struct RestorePoint {
    /// Start of the patch site
    location: *mut u8,
    /// Original data from `location`
    original: Vec<u8>,
    /// Self-jump used while writing the original bytes back
    lock: &'static [u8],
    /// Options used when the site was patched
    options: PatchOptions,
}

impl RestorePoint {
    /// Copies `len` bytes from `location` into a new restore point.
    ///
    /// Fails with [`PatchError::AccessError`] if any part of the range is unmapped or not readable,
    /// and with [`PatchError::AllocationError`] if the copy can't be stored.
    ///
    /// # Safety
    ///
    /// - The range must not be written by anyone else while it is copied
    /// - `lock` must be the self-jump of the architecture that executes `location`
    pub unsafe fn create(
        location: *mut u8,
        len: usize,
        lock: &'static [u8],
        options: PatchOptions,
    ) -> Result<Self, PatchError> {
        ensure_readable(location, len)?;

        let mut original = Vec::new();
        original.try_reserve_exact(len)?;

        // Safety: the whole range is mapped and readable, and we reserved `len` bytes
        ptr::copy_nonoverlapping(location, original.as_mut_ptr(), len);
        original.set_len(len);

        Ok(Self {
            location,
            original,
            lock,
            options,
        })
    }

    /// Address of the patch site
    pub fn addr(&self) -> *const u8 {
        self.location
    }

    /// Length of the patch site
    pub fn len(&self) -> usize {
        self.original.len()
    }

    /// Whether the restore point covers no bytes at all
    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// Bytes that were at the patch site before it was patched
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Writes the original bytes back with the same lock-step protocol used to patch.
    ///
    /// The caller must make sure nothing else is patching or restoring the same site.
    pub fn restore(self) -> Result<(), PatchError> {
        debug!(
            "restoring {} bytes at {:p}",
            self.original.len(),
            self.location
        );
        // Safety: `create` proved the range was mapped, and the site is still the one we patched
        unsafe { write_lock_step(self.location, self.lock, &self.original, self.options) }
    }
}

impl PatchGuard for RestorePoint {
    type Error = PatchError;

    fn location(&self) -> *const u8 {
        self.location
    }

    fn restore(self) -> Result<(), PatchError> {
        RestorePoint::restore(self)
    }
}

impl fmt::Debug for RestorePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestorePoint")
            .field("location", &self.location)
            .field("len", &self.original.len())
            .finish()
    }
}

// Safety: the restore point only refers to code memory, which isn't owned by any thread
unsafe impl Send for RestorePoint {}

/// Checks that every page of `[location, location + len)` is mapped and readable
fn ensure_readable(location: *const u8, len: usize) -> Result<(), PatchError> {
    let access_error = || PatchError::AccessError {
        addr: location as usize,
        len,
    };

    let regions = region::query_range(location, len).map_err(|_| access_error())?;
    let mut covered = location as usize;
    for region in regions {
        let region = region.map_err(|_| access_error())?;
        let range = region.as_range();
        // a hole between mappings
        if range.start > covered {
            return Err(access_error());
        }
        if region.is_guarded() || !region.protection().contains(Protection::READ) {
            return Err(access_error());
        }
        covered = covered.max(range.end);
    }
    if covered < location as usize + len {
        return Err(access_error());
    }
    Ok(())
}

/// Shows the bytes currently at `location`, for tests
#[cfg(test)]
pub(crate) unsafe fn peek<'a>(location: *const u8, len: usize) -> &'a [u8] {
    std::slice::from_raw_parts(location, len)
}
