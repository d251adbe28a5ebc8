//! AArch64 encoder

use super::Encoder;
use crate::error::PatchError;

/// `x17` (IP1), the intra-procedure-call scratch register
const X17: u32 = 17;

/// Number of instructions in the absolute jump
const JMP_ABS_WORDS: usize = 5;

/// Length of the encoded absolute jump
pub const JMP_ABS_LEN: usize = JMP_ABS_WORDS * 4;

/// `movz rd, #imm16, lsl #(hw * 16)`
const fn movz(rd: u32, imm16: u16, hw: u32) -> u32 {
    0xd280_0000 | (hw << 21) | ((imm16 as u32) << 5) | rd
}

/// `movk rd, #imm16, lsl #(hw * 16)`
const fn movk(rd: u32, imm16: u16, hw: u32) -> u32 {
    0xf280_0000 | (hw << 21) | ((imm16 as u32) << 5) | rd
}

/// `br rn`
const fn br(rn: u32) -> u32 {
    0xd61f_0000 | (rn << 5)
}

/// Generates an absolute jump to `target` through `x17`
pub fn jmp_abs(target: u64) -> [u8; JMP_ABS_LEN] {
    let chunk = |hw: u32| (target >> (hw * 16)) as u16;
    let words: [u32; JMP_ABS_WORDS] = [
        movz(X17, chunk(0), 0),
        movk(X17, chunk(1), 1),
        movk(X17, chunk(2), 2),
        movk(X17, chunk(3), 3),
        br(X17),
    ];

    let mut code = [0u8; JMP_ABS_LEN];
    for (dst, word) in code.chunks_exact_mut(4).zip(words) {
        dst.copy_from_slice(&word.to_le_bytes());
    }
    code
}

/// AArch64 instruction set
pub struct Aarch64;

impl Encoder for Aarch64 {
    const NAME: &'static str = "aarch64";
    const PATCH_LEN: usize = JMP_ABS_LEN;
    /// `b .`
    const LOCK: &'static [u8] = &[0x00, 0x00, 0x00, 0x14];

    type Patch = [u8; JMP_ABS_LEN];

    fn jmp_abs(target: u64) -> Result<Self::Patch, PatchError> {
        Ok(jmp_abs(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(code: &[u8]) -> Vec<u32> {
        code.chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    #[test]
    /// Known-good encodings for `movz x17, #0x6789` .. `br x17`
    fn test_jmp_abs_encoding() {
        let code = words(&jmp_abs(0x0000_0001_2345_6789));
        assert_eq!(
            code,
            [0xd28c_f131, 0xf2a4_68b1, 0xf2c0_0031, 0xf2e0_0011, 0xd61f_0220]
        );
    }

    #[test]
    /// Rebuild the target from the move-wide immediates
    fn test_jmp_abs_reaches_target() {
        for target in [0u64, 1, 0xffff_ffff_ffff_ffff, 0x0000_ffff_0000_ffff, 0x8000_0000_0000_0000] {
            let code = words(&jmp_abs(target));
            let mut x17 = 0u64;
            for (hw, word) in code[..4].iter().enumerate() {
                assert_eq!(word & 0x1f, X17);
                assert_eq!((word >> 21) & 0b11, hw as u32);
                let imm = ((word >> 5) & 0xffff) as u64;
                x17 = (x17 & !(0xffff << (hw * 16))) | (imm << (hw * 16));
            }
            assert_eq!(code[4], br(X17));
            assert_eq!(x17, target);
        }
    }

    #[test]
    fn test_lock_is_branch_to_self() {
        assert_eq!(words(Aarch64::LOCK), [0x1400_0000]);
    }
}
