//! Banked register storage.
//!
//! The sixteen registers visible to an instruction depend on the current
//! mode: FIQ shadows r8-r12, and every exception mode has its own r13/r14
//! plus an SPSR. Instead of swapping values on mode changes, the storage is
//! fixed and every access routes the register index through the bank table
//! for the requested mode.

use serde::{Deserialize, Serialize};

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;

/// Bank index per mode: User/System share a bank, the five exception modes
/// each get their own.
const fn bank_index(mode: Mode) -> usize {
    match mode {
        Mode::User | Mode::System => 0,
        Mode::Fiq => 1,
        Mode::Irq => 2,
        Mode::Supervisor => 3,
        Mode::Abort => 4,
        Mode::Undefined => 5,
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct RegisterBank {
    /// r0-r12 for every mode except FIQ's r8-r12.
    regs: [u32; 13],
    /// FIQ shadow of r8-r12.
    fiq_regs: [u32; 5],
    /// r13 (SP) per bank.
    sp_banked: [u32; 6],
    /// r14 (LR) per bank.
    lr_banked: [u32; 6],
    /// r15 is shared by every mode.
    pub pc: u32,
    /// SPSR per exception bank (index 1-5; User/System have none).
    spsr_banked: [Psr; 6],
}

impl RegisterBank {
    #[must_use]
    pub fn reg(&self, index: u32, mode: Mode) -> u32 {
        let index = (index & 0xF) as usize;
        match index {
            8..=12 if mode == Mode::Fiq => self.fiq_regs[index - 8],
            0..=12 => self.regs[index],
            13 => self.sp_banked[bank_index(mode)],
            14 => self.lr_banked[bank_index(mode)],
            _ => self.pc,
        }
    }

    pub fn set_reg(&mut self, index: u32, mode: Mode, value: u32) {
        let index = (index & 0xF) as usize;
        match index {
            8..=12 if mode == Mode::Fiq => self.fiq_regs[index - 8] = value,
            0..=12 => self.regs[index] = value,
            13 => self.sp_banked[bank_index(mode)] = value,
            14 => self.lr_banked[bank_index(mode)] = value,
            _ => self.pc = value,
        }
    }

    #[must_use]
    pub const fn spsr(&self, mode: Mode) -> Psr {
        self.spsr_banked[bank_index(mode)]
    }

    pub const fn set_spsr(&mut self, mode: Mode, value: Psr) {
        self.spsr_banked[bank_index(mode)] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn low_registers_are_shared_across_modes() {
        let mut bank = RegisterBank::default();
        bank.set_reg(3, Mode::System, 77);
        assert_eq!(bank.reg(3, Mode::Irq), 77);
        assert_eq!(bank.reg(3, Mode::Fiq), 77);
    }

    #[test]
    fn fiq_shadows_r8_to_r12() {
        let mut bank = RegisterBank::default();
        bank.set_reg(10, Mode::System, 1);
        bank.set_reg(10, Mode::Fiq, 2);
        assert_eq!(bank.reg(10, Mode::System), 1);
        assert_eq!(bank.reg(10, Mode::Fiq), 2);
        // r13 is banked separately even for FIQ.
        bank.set_reg(13, Mode::Fiq, 3);
        assert_eq!(bank.reg(13, Mode::System), 0);
    }

    #[test]
    fn sp_and_lr_are_banked_per_mode() {
        let mut bank = RegisterBank::default();
        bank.set_reg(13, Mode::System, 0x0300_7F00);
        bank.set_reg(13, Mode::Irq, 0x0300_7FA0);
        bank.set_reg(13, Mode::Supervisor, 0x0300_7FE0);

        assert_eq!(bank.reg(13, Mode::User), 0x0300_7F00);
        assert_eq!(bank.reg(13, Mode::Irq), 0x0300_7FA0);
        assert_eq!(bank.reg(13, Mode::Supervisor), 0x0300_7FE0);
    }

    #[test]
    fn pc_is_shared() {
        let mut bank = RegisterBank::default();
        bank.set_reg(15, Mode::Supervisor, 0x0800_0000);
        assert_eq!(bank.reg(15, Mode::User), 0x0800_0000);
        assert_eq!(bank.pc, 0x0800_0000);
    }
}
