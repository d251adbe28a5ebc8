//! This module adjusts memory permissions so read-only code can be patched

use region::Protection;

use crate::error::PatchError;

/// Converts a const pointer to a mutable pointer to be passed into [`with_writable`].
///
/// # Safety
///
/// **THIS FUNCTION DOES NOT CHANGE MEMORY PERMISSIONS.**
///
/// It is **NOT** safe to treat the returned value as mutable, as this function does not change memory permissions.
///
/// This function should **ONLY** be called in conjunction with [`with_writable`], which properly changes the memory permissions.
pub unsafe fn to_mut<T>(ptr: *const T) -> *mut T {
    ptr as _
}

/// Runs `action` while the pages covering `[location, location + len)` are writable.
///
/// The pages are switched to `protection` and their previous protection is put back when
/// `action` returns, including when it returns an error or unwinds.
///
/// # Safety
///
/// - `location` must point into memory mapped in this process for `len` bytes
/// - `action` must not write outside `[location, location + len)`
/// - Changing protection affects whole pages: nothing else may change the protection of those pages concurrently
pub unsafe fn with_writable<T, F>(
    location: *const u8,
    len: usize,
    protection: Protection,
    action: F,
) -> Result<T, PatchError>
where
    F: FnOnce(*mut u8) -> T,
{
    let _guard = region::protect_with_handle(location, len, protection)?;
    Ok(action(to_mut(location)))
}
