//! The ARM7TDMI core: register state, the two-slot prefetch pipeline,
//! exception entry and the step loop.
//!
//! ## Pipeline contract
//!
//! The two pipeline slots hold the instruction words at `pc - width` and
//! `pc`, so that while an instruction executes, reading r15 yields its own
//! address plus `2 * width` — the architectural "PC+8 / PC+4" rule. Any
//! non-sequential PC change refills both slots.
//!
//! ## Cycle accounting
//!
//! The CPU itself never counts cycles: every bus access charges the
//! region-appropriate wait states on the scheduler, and multiplies add
//! their internal cycles as bus idle time.

use crate::bus::Bus;
use crate::cartridge::Access;
use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::{arm, thumb};

pub struct Arm7tdmi {
    pub bus: Bus,

    pub cpsr: Psr,
    pub(crate) bank: RegisterBank,

    /// The decode and fetch slots (decode executes next).
    pipeline: [u32; 2],
    pub halted: bool,
    /// Access kind for the next opcode fetch; sequential except right
    /// after a pipeline refill.
    fetch_access: Access,
}

impl Arm7tdmi {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        let mut cpsr = Psr::from(Mode::System);
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);

        let mut bank = RegisterBank::default();
        bank.set_reg(13, Mode::System, 0x0300_7F00);
        bank.set_reg(13, Mode::Irq, 0x0300_7FA0);
        bank.set_reg(13, Mode::Supervisor, 0x0300_7FE0);

        Self {
            bus,
            cpsr,
            bank,
            pipeline: [0; 2],
            halted: false,
            fetch_access: Access::NonSequential,
        }
    }

    /// Start state for running without a BIOS image: jump straight to the
    /// cartridge entry point, interrupts enabled, as the BIOS would leave
    /// things.
    pub fn skip_bios(&mut self) {
        self.cpsr.set_irq_disable(false);
        self.bank.pc = 0x0800_0000;
        self.bus.interrupt_control.post_boot_flag = 1;
    }

    // -- Register access ----------------------------------------------------

    /// Visible register view: always routed through the bank table for the
    /// current (or an explicit) mode.
    #[must_use]
    pub fn reg(&self, index: u32) -> u32 {
        self.bank.reg(index, self.cpsr.mode())
    }

    pub(crate) fn reg_mode(&self, index: u32, mode: Mode) -> u32 {
        self.bank.reg(index, mode)
    }

    pub(crate) fn set_reg(&mut self, index: u32, value: u32) {
        self.set_reg_mode(index, value, self.cpsr.mode());
    }

    pub(crate) fn set_reg_mode(&mut self, index: u32, value: u32, mode: Mode) {
        let value = if index & 0xF == 15 {
            // The PC self-aligns to the instruction width.
            match self.cpsr.state() {
                CpuState::Arm => value & !3,
                CpuState::Thumb => value & !1,
            }
        } else {
            value
        };
        self.bank.set_reg(index, mode, value);
    }

    /// The SPSR of the current mode; reading it from User/System yields
    /// the CPSR itself, as on hardware nothing sane comes back.
    pub(crate) fn spsr(&self) -> Psr {
        match self.cpsr.mode() {
            Mode::User | Mode::System => self.cpsr,
            mode => self.bank.spsr(mode),
        }
    }

    pub(crate) fn set_spsr(&mut self, value: Psr) {
        match self.cpsr.mode() {
            Mode::User | Mode::System => {}
            mode => self.bank.set_spsr(mode, value),
        }
    }

    #[must_use]
    pub fn privileged(&self) -> bool {
        self.cpsr.mode() != Mode::User
    }

    // -- Pipeline -----------------------------------------------------------

    /// Refill both pipeline slots after a non-sequential PC change and
    /// advance the PC so the visible-r15 rule holds.
    pub fn flush_pipeline(&mut self) {
        match self.cpsr.state() {
            CpuState::Arm => {
                let pc = self.bank.pc & !3;
                self.bus.set_current_pc(pc);
                self.pipeline[0] = self.bus.read_word(pc, Access::NonSequential);
                self.pipeline[1] = self.bus.read_word(pc + 4, Access::Sequential);
                self.bank.pc = pc + 4;
            }
            CpuState::Thumb => {
                let pc = self.bank.pc & !1;
                self.bus.set_current_pc(pc);
                self.pipeline[0] = u32::from(self.bus.read_half_word(pc, Access::NonSequential));
                self.pipeline[1] =
                    u32::from(self.bus.read_half_word(pc + 2, Access::Sequential));
                self.bank.pc = pc + 2;
            }
        }
        self.fetch_access = Access::Sequential;
    }

    /// Execute one instruction (entering a pending interrupt first) and
    /// fetch its replacement into the pipeline.
    pub fn step(&mut self) {
        self.service_interrupt();

        match self.cpsr.state() {
            CpuState::Arm => {
                let instruction = self.pipeline[0];
                self.pipeline[0] = self.pipeline[1];
                let pc = self.bank.pc;
                self.bus.set_current_pc(pc);
                self.pipeline[1] = self.bus.read_word(pc + 4, self.fetch_access);
                self.fetch_access = Access::Sequential;
                self.bank.pc = pc + 4;

                if self.cpsr.can_execute(Condition::from((instruction >> 28) as u8)) {
                    arm::execute_arm(self, instruction);
                }
            }
            CpuState::Thumb => {
                let instruction = self.pipeline[0] as u16;
                self.pipeline[0] = self.pipeline[1];
                let pc = self.bank.pc;
                self.bus.set_current_pc(pc);
                self.pipeline[1] = u32::from(self.bus.read_half_word(pc + 2, self.fetch_access));
                self.fetch_access = Access::Sequential;
                self.bank.pc = pc + 2;

                thumb::execute_thumb(self, instruction);
            }
        }

        if self.bus.take_halt_request() {
            self.halted = true;
        }
    }

    /// HALT ends as soon as any enabled interrupt is requested, regardless
    /// of IME or the CPSR I bit (those only gate the vector entry).
    pub fn check_for_interrupt(&mut self) {
        if self.bus.interrupt_control.pending() {
            self.halted = false;
        }
    }

    // -- Exceptions ---------------------------------------------------------

    fn service_interrupt(&mut self) {
        if self.cpsr.irq_disable() || !self.bus.interrupt_control.deliverable() {
            return;
        }

        tracing::trace!(
            "IRQ taken: IF={:04X} at pc={:08X}",
            self.bus.interrupt_control.interrupt_request,
            self.bank.pc
        );

        let old_cpsr = self.cpsr;
        // Return convention: lr_irq = next unexecuted instruction + 4.
        let return_address = match old_cpsr.state() {
            CpuState::Arm => self.bank.pc,
            CpuState::Thumb => self.bank.pc + 2,
        };

        self.bank.set_spsr(Mode::Irq, old_cpsr);
        self.cpsr.set_mode(Mode::Irq);
        self.bank.set_reg(14, Mode::Irq, return_address);
        self.cpsr.set_state(CpuState::Arm);
        self.cpsr.set_irq_disable(true);
        self.bank.pc = 0x18;
        self.flush_pipeline();
    }

    /// SWI: enter Supervisor at vector 0x08 with the return address in
    /// r14_svc.
    pub(crate) fn software_interrupt(&mut self) {
        let old_cpsr = self.cpsr;
        let return_address = match old_cpsr.state() {
            CpuState::Arm => self.bank.pc - 4,
            CpuState::Thumb => self.bank.pc - 2,
        };

        self.bank.set_spsr(Mode::Supervisor, old_cpsr);
        self.cpsr.set_mode(Mode::Supervisor);
        self.bank.set_reg(14, Mode::Supervisor, return_address);
        self.cpsr.set_state(CpuState::Arm);
        self.cpsr.set_irq_disable(true);
        self.bank.pc = 0x08;
        self.flush_pipeline();
    }

    /// Undefined instructions (including all coprocessor encodings) enter
    /// the Undefined exception at vector 0x04.
    pub(crate) fn undefined_exception(&mut self) {
        let old_cpsr = self.cpsr;
        let return_address = match old_cpsr.state() {
            CpuState::Arm => self.bank.pc - 4,
            CpuState::Thumb => self.bank.pc - 2,
        };

        tracing::debug!("undefined instruction at {:08X}", return_address.wrapping_sub(4));

        self.bank.set_spsr(Mode::Undefined, old_cpsr);
        self.cpsr.set_mode(Mode::Undefined);
        self.bank.set_reg(14, Mode::Undefined, return_address);
        self.cpsr.set_state(CpuState::Arm);
        self.cpsr.set_irq_disable(true);
        self.bank.pc = 0x04;
        self.flush_pipeline();
    }

    /// Booth's-algorithm early-out: 1 to 4 internal cycles depending on
    /// how many significant bytes the multiplier has.
    pub(crate) fn multiply_internal_cycles(multiplier: u32) -> u64 {
        const MASKS: [u32; 3] = [0xFFFF_FF00, 0xFFFF_0000, 0xFF00_0000];
        for (i, mask) in MASKS.iter().enumerate() {
            if multiplier & mask == 0 || multiplier & mask == *mask {
                return i as u64 + 1;
            }
        }
        4
    }
}

/// CPU with the given ARM opcodes placed at the cartridge entry point.
/// Shared by the instruction-set test modules.
#[cfg(test)]
pub(crate) fn cpu_with_program(words: &[u32]) -> Arm7tdmi {
    use crate::cartridge::Cartridge;
    use crate::interface::{IdleInput, NullAudio, NullVideo};

    let mut rom = vec![0u8; 0x1000];
    rom[0xB2] = 0x96;
    for (i, word) in words.iter().enumerate() {
        rom[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    let bus = Bus::new(
        Cartridge::new(rom).unwrap(),
        Box::new(NullVideo),
        Box::new(NullAudio),
        Box::new(IdleInput),
    );
    let mut cpu = Arm7tdmi::new(bus);
    cpu.skip_bios();
    cpu.flush_pipeline();
    cpu
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn visible_r15_is_instruction_address_plus_8() {
        // MOV r0, r15
        let mut cpu = cpu_with_program(&[0xE1A0_000F]);
        cpu.step();
        assert_eq!(cpu.reg(0), 0x0800_0008);
    }

    #[test]
    fn swi_enters_supervisor_with_the_documented_state() {
        // SWI #0
        let mut cpu = cpu_with_program(&[0xEF00_0000]);
        cpu.step();

        assert_eq!(cpu.cpsr.mode(), Mode::Supervisor);
        assert_eq!(cpu.bank.reg(14, Mode::Supervisor), 0x0800_0004);
        assert!(cpu.cpsr.irq_disable());
        assert_eq!(cpu.cpsr.state(), CpuState::Arm);
        // Pipeline refilled from the vector: pc = 0x08 + 4.
        assert_eq!(cpu.bank.pc, 0x0C);
        // The pre-exception CPSR landed in SPSR_svc.
        assert_eq!(cpu.spsr().mode(), Mode::System);
    }

    #[test]
    fn undefined_instruction_vectors_to_0x04() {
        let mut cpu = cpu_with_program(&[0xE7F0_00F0]); // undefined hole
        cpu.step();
        assert_eq!(cpu.cpsr.mode(), Mode::Undefined);
        assert_eq!(cpu.bank.pc, 0x04 + 4);
        assert_eq!(cpu.bank.reg(14, Mode::Undefined), 0x0800_0004);
    }

    #[test]
    fn irq_is_taken_between_instructions() {
        // Two NOPs (MOV r0, r0).
        let mut cpu = cpu_with_program(&[0xE1A0_0000, 0xE1A0_0000]);
        cpu.cpsr.set_irq_disable(false);
        cpu.bus.interrupt_control.interrupt_enable = 1;
        cpu.bus.interrupt_control.interrupt_master_enable = 1;
        cpu.step();

        cpu.bus.interrupt_control.request(
            crate::cpu::hardware::interrupt_control::IrqType::VBlank,
        );
        cpu.step();

        assert_eq!(cpu.cpsr.mode(), Mode::Irq);
        assert_eq!(cpu.bank.pc, 0x18 + 4);
        // The next unexecuted instruction was at 0x0800_0004: lr = that + 4.
        assert_eq!(cpu.bank.reg(14, Mode::Irq), 0x0800_0008);
        assert!(cpu.cpsr.irq_disable());
    }

    #[test]
    fn irq_respects_the_i_bit_and_ime() {
        let mut cpu = cpu_with_program(&[0xE1A0_0000, 0xE1A0_0000]);
        cpu.bus.interrupt_control.interrupt_enable = 1;
        cpu.bus.interrupt_control.interrupt_request = 1;
        cpu.bus.interrupt_control.interrupt_master_enable = 0;
        cpu.cpsr.set_irq_disable(false);
        cpu.step();
        assert_eq!(cpu.cpsr.mode(), Mode::System);

        cpu.bus.interrupt_control.interrupt_master_enable = 1;
        cpu.cpsr.set_irq_disable(true);
        cpu.step();
        assert_eq!(cpu.cpsr.mode(), Mode::System);
    }

    #[test]
    fn halt_clears_on_pending_interrupt_regardless_of_ime() {
        let mut cpu = cpu_with_program(&[0xE1A0_0000]);
        cpu.halted = true;
        cpu.bus.interrupt_control.interrupt_enable = 0b1000;
        cpu.bus.interrupt_control.interrupt_master_enable = 0;

        cpu.check_for_interrupt();
        assert!(cpu.halted);

        cpu.bus.interrupt_control.interrupt_request = 0b1000;
        cpu.check_for_interrupt();
        assert!(!cpu.halted);
    }

    #[test]
    fn multiply_cycles_depend_on_significant_bytes() {
        assert_eq!(Arm7tdmi::multiply_internal_cycles(0x0000_0012), 1);
        assert_eq!(Arm7tdmi::multiply_internal_cycles(0xFFFF_FFF2), 1);
        assert_eq!(Arm7tdmi::multiply_internal_cycles(0x0000_1200), 2);
        assert_eq!(Arm7tdmi::multiply_internal_cycles(0x0012_0000), 3);
        assert_eq!(Arm7tdmi::multiply_internal_cycles(0x1200_0000), 4);
    }
}
