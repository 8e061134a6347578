//! Interrupt controller registers.
//!
//! | Register | Address       | Description                                  |
//! |----------|---------------|----------------------------------------------|
//! | IE       | `0x0400_0200` | Interrupt Enable - which IRQs can fire       |
//! | IF       | `0x0400_0202` | Interrupt Request Flags - pending interrupts |
//! | IME      | `0x0400_0208` | Interrupt Master Enable - global on/off      |
//!
//! Hardware sets a bit in IF when an event occurs; software acknowledges by
//! writing `1` back to that bit. The CPU samples `IE & IF` under IME before
//! every instruction, and HALT exits on `IE & IF != 0` regardless of IME.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IrqType {
    VBlank,
    HBlank,
    VCount,
    Timer0,
    Timer1,
    Timer2,
    Timer3,
    Serial,
    Dma0,
    Dma1,
    Dma2,
    Dma3,
    Keypad,
    Gamepak,
}

impl IrqType {
    /// Bit position of this source inside IE and IF.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::VBlank => 0,
            Self::HBlank => 1,
            Self::VCount => 2,
            Self::Timer0 => 3,
            Self::Timer1 => 4,
            Self::Timer2 => 5,
            Self::Timer3 => 6,
            Self::Serial => 7,
            Self::Dma0 => 8,
            Self::Dma1 => 9,
            Self::Dma2 => 10,
            Self::Dma3 => 11,
            Self::Keypad => 12,
            Self::Gamepak => 13,
        }
    }

    #[must_use]
    pub const fn timer(n: usize) -> Self {
        match n {
            0 => Self::Timer0,
            1 => Self::Timer1,
            2 => Self::Timer2,
            _ => Self::Timer3,
        }
    }

    #[must_use]
    pub const fn dma(n: usize) -> Self {
        match n {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct InterruptControl {
    pub interrupt_enable: u16,
    /// IF: bits set when interrupts are requested, cleared by writing 1 to
    /// the corresponding bit.
    pub interrupt_request: u16,
    pub interrupt_master_enable: u16,
    pub post_boot_flag: u8,
}

impl InterruptControl {
    pub fn request(&mut self, irq: IrqType) {
        self.interrupt_request.set_bit(irq.index(), true);
    }

    /// Write-1-to-clear for a byte of IF.
    pub fn acknowledge_byte(&mut self, byte_nth: u8, value: u8) {
        self.interrupt_request &= !(u16::from(value) << (byte_nth * 8));
    }

    /// Any enabled interrupt pending. This is what ends HALT.
    #[must_use]
    pub const fn pending(&self) -> bool {
        self.interrupt_enable & self.interrupt_request != 0
    }

    /// Pending and deliverable: IME on top of the IE/IF match. The CPSR I
    /// bit is the CPU's business.
    #[must_use]
    pub fn deliverable(&self) -> bool {
        self.pending() && self.interrupt_master_enable.get_bit(0)
    }
}
