//! x86-64 encoder

use std::mem;

use super::Encoder;
use crate::error::PatchError;

#[repr(C, packed)]
#[allow(dead_code)]
/// Struct helper for generating an absolute jump
struct JmpAbs {
    /// `mov r11, imm64` opcode bytes
    mov: [u8; 2],
    /// Absolute address to jump to
    target: u64,
    /// `jmp r11`
    jmp: [u8; 3],
}

/// Length of the encoded absolute jump
pub const JMP_ABS_LEN: usize = mem::size_of::<JmpAbs>();

/// Generates an absolute jump to a specified address and returns bytecode
///
/// The target is loaded into `r11`, which is caller-saved and never used to pass arguments.
pub fn jmp_abs(target: u64) -> [u8; JMP_ABS_LEN] {
    unsafe {
        mem::transmute(JmpAbs {
            mov: [0x49, 0xbb],
            target: target.to_le(),
            jmp: [0x41, 0xff, 0xe3],
        })
    }
}

/// x86-64 instruction set
pub struct X64;

impl Encoder for X64 {
    const NAME: &'static str = "x86_64";
    const PATCH_LEN: usize = JMP_ABS_LEN;
    /// `jmp $`
    const LOCK: &'static [u8] = &[0xeb, 0xfe];

    type Patch = [u8; JMP_ABS_LEN];

    fn jmp_abs(target: u64) -> Result<Self::Patch, PatchError> {
        Ok(jmp_abs(target))
    }
}
