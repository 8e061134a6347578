//! Barrel shifter.
//!
//! The shifter feeds the second operand of every data-processing instruction
//! and the offset of register-offset transfers. Amounts above 31 and the
//! immediate-form zero encodings all have architecturally defined results
//! and carry-outs, reproduced here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl From<u32> for ShiftKind {
    fn from(op: u32) -> Self {
        match op & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Shift result plus the shifter carry-out. `amount` is the already-resolved
/// amount: callers translate the immediate-form zero encodings (LSR #0 means
/// LSR #32, ASR #0 means ASR #32, ROR #0 means RRX) before calling, and pass
/// the low byte of the register for register-specified shifts.
pub fn shift_with_carry(kind: ShiftKind, value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, carry_in);
    }

    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => (value << amount, value >> (32 - amount) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        ShiftKind::Lsr => match amount {
            1..=31 => (value >> amount, value >> (amount - 1) & 1 != 0),
            32 => (0, value >> 31 != 0),
            _ => (0, false),
        },
        ShiftKind::Asr => {
            let signed = value as i32;
            if amount < 32 {
                ((signed >> amount) as u32, signed >> (amount - 1) & 1 != 0)
            } else {
                // Fills with the sign bit, which is also the carry-out.
                ((signed >> 31) as u32, signed < 0)
            }
        }
        ShiftKind::Ror => {
            let amount = amount & 0x1F;
            if amount == 0 {
                // ROR by a multiple of 32: value unchanged, carry = bit 31.
                (value, value >> 31 != 0)
            } else {
                let result = value.rotate_right(amount);
                (result, result >> 31 != 0)
            }
        }
    }
}

/// Rotate-right-extended: 33-bit rotate through the carry flag.
pub const fn rrx(value: u32, carry_in: bool) -> (u32, bool) {
    (((carry_in as u32) << 31) | (value >> 1), value & 1 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zero_amount_passes_value_and_carry_through() {
        assert_eq!(shift_with_carry(ShiftKind::Lsl, 0xDEAD, 0, true), (0xDEAD, true));
        assert_eq!(shift_with_carry(ShiftKind::Ror, 0xDEAD, 0, false), (0xDEAD, false));
    }

    #[test]
    fn lsl_carry_is_the_last_bit_shifted_out() {
        assert_eq!(shift_with_carry(ShiftKind::Lsl, 1, 4, false), (0x10, false));
        assert_eq!(shift_with_carry(ShiftKind::Lsl, 0x8000_0001, 1, false), (2, true));
        assert_eq!(shift_with_carry(ShiftKind::Lsl, 1, 32, false), (0, true));
        assert_eq!(shift_with_carry(ShiftKind::Lsl, u32::MAX, 33, true), (0, false));
    }

    #[test]
    fn lsr_32_drops_to_zero_with_top_bit_carry() {
        assert_eq!(shift_with_carry(ShiftKind::Lsr, 0x8000_0000, 32, false), (0, true));
        assert_eq!(shift_with_carry(ShiftKind::Lsr, 0x7FFF_FFFF, 32, true), (0, false));
        assert_eq!(shift_with_carry(ShiftKind::Lsr, 0x80, 8, false), (0, true));
    }

    #[test]
    fn asr_saturates_to_sign_fill() {
        assert_eq!(
            shift_with_carry(ShiftKind::Asr, 0x8000_0000, 32, false),
            (0xFFFF_FFFF, true)
        );
        assert_eq!(shift_with_carry(ShiftKind::Asr, 0x4000_0000, 40, false), (0, false));
        assert_eq!(
            shift_with_carry(ShiftKind::Asr, 0x8000_0000, 1, false),
            (0xC000_0000, false)
        );
    }

    #[test]
    fn ror_wraps_modulo_32() {
        assert_eq!(shift_with_carry(ShiftKind::Ror, 0xF, 4, false), (0xF000_0000, true));
        assert_eq!(shift_with_carry(ShiftKind::Ror, 0xF, 36, false), (0xF000_0000, true));
        // Multiple of 32: unchanged, carry from bit 31.
        assert_eq!(
            shift_with_carry(ShiftKind::Ror, 0x8000_0000, 32, false),
            (0x8000_0000, true)
        );
    }

    #[test]
    fn rrx_rotates_through_carry() {
        assert_eq!(rrx(0b11, false), (0b1, true));
        assert_eq!(rrx(0b10, true), (0x8000_0001, false));
    }
}
