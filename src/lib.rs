#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod code;
pub mod error;
pub mod hook;
pub mod patcher;

pub use error::PatchError;
pub use hook::jmphook::{JmpHook, JmpHookGuard};
pub use patcher::restore::RestorePoint;
pub use patcher::PatchOptions;

#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
))]
mod native {
    use crate::code::NativeEncoder;
    use crate::error::PatchError;
    use crate::hook::jmphook::JmpHook;
    use crate::patcher::restore::RestorePoint;

    /// Redirects every future call of `func` to `hook`.
    ///
    /// Returns the restore point that puts `func` back. Dropping it keeps the hook for good.
    ///
    /// # Safety
    ///
    /// See [`JmpHook::patch`]
    pub unsafe fn patch(func: *const u8, hook: *const u8) -> Result<RestorePoint, PatchError> {
        JmpHook::<NativeEncoder>::new().patch(func, hook)
    }

    /// Redirects `func` to `hook` and returns a callable pointer to the original `func`.
    ///
    /// Always fails with [`PatchError::Unsupported`] without modifying `func`.
    ///
    /// # Safety
    ///
    /// See [`JmpHook::patch`]
    pub unsafe fn patch_with_original(
        func: *const u8,
        hook: *const u8,
    ) -> Result<(RestorePoint, *const u8), PatchError> {
        JmpHook::<NativeEncoder>::new().patch_with_original(func, hook)
    }

    /// Makes every thread that enters `func` from now on spin forever.
    ///
    /// # Safety
    ///
    /// See [`JmpHook::lock`]
    pub unsafe fn patch_lock(func: *const u8) -> Result<(), PatchError> {
        JmpHook::<NativeEncoder>::new().lock(func)
    }

}

#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
))]
pub use native::{patch, patch_lock, patch_with_original};
