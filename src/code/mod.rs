//! # Code
//!
//! Machine code generators for the absolute jumps written over a patch site.
//!
//! Each supported instruction set provides one [`Encoder`]. Exactly one of them is the
//! [`NativeEncoder`] of a build, selected by `target_arch`; the others still compile so their
//! payloads can be produced and inspected on any host.

use crate::error::PatchError;

pub mod aarch64;
pub mod rv64;
pub mod x64;

/// Produces the patch payload and lock payload for one instruction set
pub trait Encoder {
    /// Human readable name of the instruction set
    const NAME: &'static str;
    /// Length in bytes of every payload returned by [`Encoder::jmp_abs`], whatever the target
    const PATCH_LEN: usize;
    /// A single instruction that jumps to itself.
    ///
    /// Its length is the width of the atomic stores used while patching, so it must be 2, 4 or 8 bytes.
    const LOCK: &'static [u8];

    /// Fixed-size byte buffer holding an encoded payload
    type Patch: AsRef<[u8]>;

    /// Encodes an unconditional jump to the absolute address `target`.
    ///
    /// The generated code only clobbers the scratch registers reserved by the encoder.
    fn jmp_abs(target: u64) -> Result<Self::Patch, PatchError>;

    /// Builds a callable copy of the instructions displaced by a patch at `site`.
    ///
    /// # Safety
    ///
    /// `site` must be valid for reads of [`Encoder::PATCH_LEN`] bytes
    unsafe fn trampoline(site: *const u8) -> Result<*const u8, PatchError> {
        let _ = site;
        Err(PatchError::Unsupported(
            "original function relocation is not implemented",
        ))
    }
}

/// Encoder for the architecture this crate was built for
#[cfg(target_arch = "x86_64")]
pub type NativeEncoder = x64::X64;
/// Encoder for the architecture this crate was built for
#[cfg(target_arch = "aarch64")]
pub type NativeEncoder = aarch64::Aarch64;
/// Encoder for the architecture this crate was built for
#[cfg(target_arch = "riscv64")]
pub type NativeEncoder = rv64::Rv64;
