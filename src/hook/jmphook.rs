//! # Jump Hook
//!
//! This hook type overwrites the entry of a function with an absolute jump to the hook

use std::mem::ManuallyDrop;

use log::{debug, warn};

use crate::code::Encoder;
use crate::error::PatchError;
use crate::patcher::atomic::LockStepPatcher;
use crate::patcher::mem::to_mut;
use crate::patcher::restore::RestorePoint;
use crate::patcher::{PatchOptions, Patcher};

use super::{Hook, HookGuard};

/// Absolute jump hook for instruction set `E`
pub struct JmpHook<E> {
    /// Underlying patcher to be used to hook
    patcher: LockStepPatcher<E>,
}

impl<E: Encoder> JmpHook<E> {
    /// Creates a new jmp hook
    pub fn new() -> Self {
        Self::with_options(PatchOptions::default())
    }

    /// Creates a new jmp hook whose patches use `options`
    pub fn with_options(options: PatchOptions) -> Self {
        Self {
            patcher: LockStepPatcher::with_options(options),
        }
    }

    /// Redirects `source` to `destination` and returns the restore point for `source`.
    ///
    /// The jump doesn't preserve a return address into `source`, so the hook can't return into
    /// the original function.
    ///
    /// # Safety
    ///
    /// - `source` must be the entry of a function at least [`Encoder::PATCH_LEN`] bytes long
    /// - `destination` must be valid executable code with the same signature as `source`
    /// - No other patch of `source` may be in flight
    pub unsafe fn patch(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<RestorePoint, PatchError> {
        let payload = E::jmp_abs(destination as u64)?;
        let restore_point = self.patcher.patch(to_mut(source), payload.as_ref())?;
        debug!("redirected {:p} to {:p}", source, destination);
        Ok(restore_point)
    }

    /// Like [`JmpHook::patch`], but also returns a callable pointer to the original function.
    ///
    /// None of the encoders can relocate the displaced instructions yet, so this fails with
    /// [`PatchError::Unsupported`] before touching `source`.
    ///
    /// # Safety
    ///
    /// See [`JmpHook::patch`]
    pub unsafe fn patch_with_original(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<(RestorePoint, *const u8), PatchError> {
        let original = E::trampoline(source)?;
        let restore_point = self.patch(source, destination)?;
        Ok((restore_point, original))
    }

    /// Freezes `source` by writing a jump-to-self over its first instruction.
    ///
    /// # Safety
    ///
    /// `source` must be valid code of instruction set `E`. Every thread calling `source`
    /// afterwards hangs.
    pub unsafe fn lock(&self, source: *const u8) -> Result<(), PatchError> {
        self.patcher.lock(to_mut(source))
    }
}

impl<E: Encoder> Default for JmpHook<E> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<E: Encoder> Hook for JmpHook<E> {
    type Error = PatchError;
    type Guard<'a> = JmpHookGuard
    where
        Self: 'a;

    unsafe fn hook(
        &self,
        source: *const u8,
        destination: *const u8,
    ) -> Result<Self::Guard<'_>, Self::Error> {
        self.patch(source, destination).map(JmpHookGuard::new)
    }
}

/// Guard for jmp hooks. The original function is restored when the guard is dropped.
#[must_use = "dropping the guard unhooks immediately"]
pub struct JmpHookGuard {
    /// Restore point of the hooked function. `ManuallyDrop` so it can be moved out in `Drop`
    restore_point: ManuallyDrop<RestorePoint>,
}

impl JmpHookGuard {
    /// Creates a new jmp hook guard that wraps `restore_point`
    fn new(restore_point: RestorePoint) -> Self {
        Self {
            restore_point: ManuallyDrop::new(restore_point),
        }
    }

    /// Get the underlying restore point in case info is needed
    pub fn restore_point(&self) -> &RestorePoint {
        &self.restore_point
    }

    /// Releases the restore point without unhooking
    pub fn into_restore_point(self) -> RestorePoint {
        let mut guard = ManuallyDrop::new(self);
        // Safety: `guard` is never dropped, so the restore point is only taken once
        unsafe { ManuallyDrop::take(&mut guard.restore_point) }
    }

    /// Takes the restore point out of a guard that's going away
    ///
    /// # Safety
    ///
    /// Must be called at most once, and `self.restore_point` must not be used afterwards
    unsafe fn take(&mut self) -> RestorePoint {
        ManuallyDrop::take(&mut self.restore_point)
    }
}

unsafe impl HookGuard for JmpHookGuard {
    type Error = PatchError;

    fn unhook(self) -> Result<(), PatchError> {
        self.into_restore_point().restore()
    }
}

impl Drop for JmpHookGuard {
    fn drop(&mut self) {
        // Safety: `drop` runs once and nothing touches the restore point after it
        let restore_point = unsafe { self.take() };
        let location = restore_point.addr();
        if let Err(e) = restore_point.restore() {
            warn!("failed to unhook {:p}: {}", location, e);
        }
    }
}
