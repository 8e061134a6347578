//! Keypad input and the keypad interrupt condition.
//!
//! KEYINPUT is not stored: it is derived from the host input source at read
//! time (0 = pressed, bits 0-9). KEYCNT selects which keys participate in
//! the interrupt condition, whether they combine with AND or OR, and whether
//! the interrupt is enabled at all.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Default, Serialize, Deserialize)]
pub struct Keypad {
    pub key_interrupt_control: u16,
}

impl Keypad {
    pub fn write_control_byte(&mut self, byte_nth: u8, value: u8) {
        // Bits 10-13 of KEYCNT are unused.
        let value = if byte_nth == 1 { value & 0xC3 } else { value };
        self.key_interrupt_control.set_byte(byte_nth, value);
    }

    /// Evaluates the KEYCNT condition against the current KEYINPUT value.
    /// Returns true when the keypad interrupt should be requested.
    #[must_use]
    pub fn interrupt_condition_met(&self, keys: u16) -> bool {
        if !self.key_interrupt_control.get_bit(14) {
            return false;
        }

        let selected = self.key_interrupt_control & 0x3FF;
        let pressed = !keys & selected;

        if self.key_interrupt_control.get_bit(15) {
            // Logical AND: every selected button is down.
            selected != 0 && pressed == selected
        } else {
            // Logical OR: any selected button is down.
            pressed != 0
        }
    }
}
