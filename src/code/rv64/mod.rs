//! RISC-V 64 encoder
//!
//! The absolute jump is built from `lui`/`addi` pairs. Both immediates are sign-extended by the
//! hardware, so every upper immediate is pre-biased to cancel out a negative lower part:
//!
//! ```text
//! lui   x31, upper_hi20
//! addi  x31, x31, upper_lo12
//! slli  x31, x31, 32
//! lui   x30, lower_hi20
//! add   x31, x31, x30
//! jalr  x0, lower_lo12(x31)
//! ```
//!
//! `jalr` writes the return address to `x0`, so this is a tail jump. Only `x30` and `x31` are
//! clobbered.

use super::Encoder;
use crate::error::PatchError;

/// Always zero
pub const X0: u32 = 0;
/// Secondary scratch register, holds the lower half of the target
pub const X30: u32 = 30;
/// Primary scratch register, holds the final target
pub const X31: u32 = 31;

/// Number of instructions in the absolute jump
const JMP_ABS_WORDS: usize = 6;

/// Length of the encoded absolute jump
pub const JMP_ABS_LEN: usize = JMP_ABS_WORDS * 4;

/// `lui rd, imm20`
pub const fn lui(rd: u32, imm20: u32) -> u32 {
    ((imm20 & 0xf_ffff) << 12) | (rd << 7) | 0x37
}

/// `addi rd, rs, imm12`
pub const fn addi(rd: u32, rs: u32, imm12: u32) -> u32 {
    ((imm12 & 0xfff) << 20) | (rs << 15) | (0b000 << 12) | (rd << 7) | 0x13
}

/// `slli rd, rs, shamt`
pub const fn slli(rd: u32, rs: u32, shamt: u32) -> u32 {
    ((shamt & 0x3f) << 20) | (rs << 15) | (0b001 << 12) | (rd << 7) | 0x13
}

/// `add rd, rs1, rs2`
pub const fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    (rs2 << 20) | (rs1 << 15) | (0b000 << 12) | (rd << 7) | 0x33
}

/// `jalr rd, imm12(rs)`
pub const fn jalr(rd: u32, rs: u32, imm12: u32) -> u32 {
    ((imm12 & 0xfff) << 20) | (rs << 15) | (0b000 << 12) | (rd << 7) | 0x67
}

/// `c.j offset`, the compressed unconditional jump. Only even offsets within +-2KiB are encodable.
pub const fn c_j(offset: i16) -> u16 {
    let imm = offset as u16;
    // offset[11|4|9:8|10|6|7|3:1|5] lands in bits [12:2]
    let bits = (((imm >> 11) & 1) << 12)
        | (((imm >> 4) & 1) << 11)
        | (((imm >> 8) & 0b11) << 9)
        | (((imm >> 10) & 1) << 8)
        | (((imm >> 6) & 1) << 7)
        | (((imm >> 7) & 1) << 6)
        | (((imm >> 1) & 0b111) << 3)
        | (((imm >> 5) & 1) << 2);
    (0b101 << 13) | bits | 0b01
}

/// Splits a 32-bit value into the `lui` and 12-bit immediates that rebuild it.
///
/// The 12-bit part is sign-extended when it's added, so bit 11 carries into the upper field:
/// the upper field is `(value >> 12) + bit11`, wrapped to 20 bits.
pub const fn split_imm32(value: u32) -> (u32, u32) {
    let carry = (value >> 11) & 1;
    let hi20 = ((value >> 12) + carry) & 0xf_ffff;
    (hi20, value & 0xfff)
}

/// Sign-extends the low `bits` bits of `value`
const fn sext(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Value that `lui rd, hi20` followed by adding `lo12` leaves in a 64-bit register
const fn materialized(hi20: u32, lo12: u32) -> i64 {
    sext((hi20 as u64) << 12, 32).wrapping_add(sext(lo12 as u64, 12))
}

/// Generates an absolute jump to `target`
pub fn jmp_abs(target: u64) -> [u8; JMP_ABS_LEN] {
    let (lower_hi20, lower_lo12) = split_imm32(target as u32);

    // The lower half ends up sign-extended to 64 bits, so it may borrow from the upper half.
    // Bias the upper half by exactly what the lower build takes away.
    let lower = materialized(lower_hi20, lower_lo12);
    let upper = (target.wrapping_sub(lower as u64) >> 32) as u32;
    let (upper_hi20, upper_lo12) = split_imm32(upper);

    let words: [u32; JMP_ABS_WORDS] = [
        lui(X31, upper_hi20),
        addi(X31, X31, upper_lo12),
        slli(X31, X31, 32),
        lui(X30, lower_hi20),
        add(X31, X31, X30),
        jalr(X0, X31, lower_lo12),
    ];

    let mut code = [0u8; JMP_ABS_LEN];
    for (dst, word) in code.chunks_exact_mut(4).zip(words) {
        dst.copy_from_slice(&word.to_le_bytes());
    }
    code
}

/// `c.j 0`, a jump onto itself
const SELF_JUMP: [u8; 2] = c_j(0).to_le_bytes();

/// RISC-V 64 instruction set with the compressed extension
pub struct Rv64;

impl Encoder for Rv64 {
    const NAME: &'static str = "riscv64";
    const PATCH_LEN: usize = JMP_ABS_LEN;
    const LOCK: &'static [u8] = &SELF_JUMP;

    type Patch = [u8; JMP_ABS_LEN];

    fn jmp_abs(target: u64) -> Result<Self::Patch, PatchError> {
        Ok(jmp_abs(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Register file and program counter of a tiny RV64I subset
    struct Hart {
        x: [u64; 32],
        pc: u64,
    }

    impl Hart {
        fn new(pc: u64) -> Self {
            // fill with junk so we can tell which registers got touched
            let mut x = [0u64; 32];
            for (i, reg) in x.iter_mut().enumerate().skip(1) {
                *reg = 0x5a5a_0000_0000_0000 | i as u64;
            }
            Self { x, pc }
        }

        fn set(&mut self, rd: usize, value: u64) {
            if rd != 0 {
                self.x[rd] = value;
            }
        }

        /// Executes one 32-bit instruction. Returns `true` when it transferred control.
        fn step(&mut self, insn: u32) -> bool {
            let opcode = insn & 0x7f;
            let rd = ((insn >> 7) & 0x1f) as usize;
            let funct3 = (insn >> 12) & 0b111;
            let rs1 = ((insn >> 15) & 0x1f) as usize;
            let rs2 = ((insn >> 20) & 0x1f) as usize;
            let imm_i = sext((insn >> 20) as u64, 12) as u64;
            let next = self.pc.wrapping_add(4);
            match (opcode, funct3) {
                (0x37, _) => self.set(rd, sext((insn & 0xffff_f000) as u64, 32) as u64),
                (0x13, 0b000) => self.set(rd, self.x[rs1].wrapping_add(imm_i)),
                (0x13, 0b001) => {
                    assert_eq!(insn >> 26, 0, "not slli");
                    self.set(rd, self.x[rs1] << ((insn >> 20) & 0x3f))
                }
                (0x33, 0b000) => {
                    assert_eq!(insn >> 25, 0, "not add");
                    self.set(rd, self.x[rs1].wrapping_add(self.x[rs2]))
                }
                (0x67, 0b000) => {
                    let target = self.x[rs1].wrapping_add(imm_i) & !1;
                    self.set(rd, next);
                    self.pc = target;
                    return true;
                }
                _ => panic!("unexpected instruction {insn:#010x}"),
            }
            self.pc = next;
            false
        }

        /// Runs the payload and returns the register file at the jump along with the jump target
        fn run(mut self, code: &[u8]) -> (Self, u64) {
            let words: Vec<u32> = code
                .chunks_exact(4)
                .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                .collect();
            let start = self.pc;
            for (i, insn) in words.iter().enumerate() {
                assert_eq!(self.pc, start + 4 * i as u64);
                if self.step(*insn) {
                    assert_eq!(i, words.len() - 1, "jumped early");
                    let target = self.pc;
                    return (self, target);
                }
            }
            panic!("payload never jumped");
        }
    }

    /// Runs the payload for `target` and checks the jump and the register side effects
    fn check(target: u64) {
        let code = jmp_abs(target);
        assert_eq!(code.len(), JMP_ABS_LEN);

        let before = Hart::new(0x8000_0000);
        let saved = before.x;
        let (after, jumped) = before.run(&code);
        assert_eq!(jumped, target & !1, "jump to {target:#x}");

        for reg in 0..32 {
            if reg != X30 as usize && reg != X31 as usize {
                assert_eq!(after.x[reg], saved[reg], "x{reg} clobbered");
            }
        }
        assert_eq!(after.x[0], 0);
    }

    /// xorshift64, good enough to spray addresses around
    fn addresses(mut seed: u64, count: usize) -> impl Iterator<Item = u64> {
        (0..count).map(move |_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        })
    }

    #[test]
    /// Reference example: the registers hold the target once the halves are combined
    fn test_example_address() {
        let target = 0x0000_0001_2345_6789;
        let code = jmp_abs(target);
        let words: Vec<u32> = code
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(
            words,
            [
                lui(X31, 0),
                addi(X31, X31, 1),
                slli(X31, X31, 32),
                lui(X30, 0x23456),
                add(X31, X31, X30),
                jalr(X0, X31, 0x789),
            ]
        );

        // stop right before the jump
        let mut hart = Hart::new(0);
        for insn in &words[..5] {
            assert!(!hart.step(*insn));
        }
        let jalr_imm = sext((words[5] >> 20) as u64, 12) as u64;
        assert_eq!(hart.x[X31 as usize].wrapping_add(jalr_imm), 0x0000_0001_2345_6789);

        check(target);
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(lui(X31, 0x12345), 0x12345fb7);
        assert_eq!(addi(X31, X31, 0x001), 0x001f8f93);
        assert_eq!(slli(X31, X31, 32), 0x020f9f93);
        assert_eq!(add(X31, X31, X30), 0x01ef8fb3);
        assert_eq!(jalr(X0, X31, 0), 0x000f8067);
    }

    #[test]
    /// Bit 11 set in a 12-bit part bumps the upper field by one over the plain shift
    fn test_sign_extension_compensation() {
        for value in [0x0000_0800u32, 0x1234_5fff, 0x0000_0fff, 0x7fff_f800, 0xffff_f800] {
            let (hi20, lo12) = split_imm32(value);
            assert_eq!(hi20, ((value >> 12) + 1) & 0xf_ffff);
            assert_eq!(materialized(hi20, lo12) as u32, value);
        }
        for value in [0x0000_07ffu32, 0x1234_5000, 0x8000_0000] {
            let (hi20, _) = split_imm32(value);
            assert_eq!(hi20, value >> 12);
        }

        for target in [
            0x0000_0800_0000_0800u64,
            0x0000_0fff_0000_0fff,
            0x1234_5800_6789_a800,
            0x0000_0000_8000_0000,
            0x0000_0000_ffff_f800,
            0x0000_0000_7fff_f800,
            0x7fff_ffff_ffff_f800,
            0xffff_ffff_7fff_f800,
        ] {
            check(target);
        }
    }

    #[test]
    fn test_degenerate_halves_keep_full_length() {
        for target in [
            0u64,
            0x0000_0000_dead_beef,
            0xdead_beef_0000_0000,
            0xffff_ffff_ffff_ffff,
            0xffff_ffff_0000_0000,
            0x0000_0000_ffff_ffff,
            0x8000_0000_0000_0000,
        ] {
            assert_eq!(Rv64::jmp_abs(target).unwrap().len(), Rv64::PATCH_LEN);
            check(target);
        }
    }

    #[test]
    fn test_random_targets() {
        for target in addresses(0x9e37_79b9_7f4a_7c15, 20_000) {
            check(target);
        }
    }

    #[test]
    /// `c.j 0` is 0xa001 and jumps back onto itself
    fn test_lock_is_self_jump() {
        assert_eq!(Rv64::LOCK, &[0x01, 0xa0]);
        assert_eq!(c_j(0), 0xa001);
    }

    #[test]
    /// Cross-check the c.j immediate scrambling against hand-assembled values
    fn test_c_j_offsets() {
        // c.j -2
        assert_eq!(c_j(-2), 0xbffd);
        // c.j 2
        assert_eq!(c_j(2), 0xa009);
    }
}
