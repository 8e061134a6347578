//! Noise channel (channel 4): a 15-bit (or 7-bit) LFSR clocked by its own
//! scheduler event.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

#[derive(Serialize, Deserialize)]
pub struct Noise {
    pub length_envelope: u16,
    pub frequency_control: u16,
    enabled: bool,
    high: bool,
    lfsr: u16,
    current_volume: u8,
    envelope_timer: u16,
    length_timer: u16,
    frequency_event: EventHandle,
}

impl Noise {
    pub fn new(scheduler: &mut Scheduler) -> Self {
        Self {
            length_envelope: 0,
            frequency_control: 0,
            enabled: false,
            high: false,
            lfsr: 0x4000,
            current_volume: 0,
            envelope_timer: 0,
            length_timer: 0,
            frequency_event: scheduler.register_handle(),
        }
    }

    pub fn read8(&self, offset: u32) -> u8 {
        match offset {
            0x1 => self.length_envelope.get_byte(1),
            0x4 => self.frequency_control.get_byte(0),
            0x5 => self.frequency_control.get_byte(1) & 0x40,
            _ => 0,
        }
    }

    pub fn write8(&mut self, offset: u32, value: u8, scheduler: &mut Scheduler) {
        match offset {
            0x0 => self.length_envelope.set_byte(0, value & 0x3F),
            0x1 => self.length_envelope.set_byte(1, value),
            0x4 => self.frequency_control.set_byte(0, value),
            0x5 => {
                self.frequency_control.set_byte(1, value);
                if value.get_bit(7) {
                    self.restart(scheduler);
                }
            }
            _ => {}
        }
    }

    fn frequency_timer(&self) -> u64 {
        let r = u64::from(self.frequency_control & 0xF);
        let s = self.frequency_control.get_bits(4..=7);
        let base = if r == 0 { 8 } else { 16 * r };
        base << (s + 1)
    }

    /// LFSR clock, fired from the scheduler.
    pub fn tick(&mut self, late: u64, scheduler: &mut Scheduler) {
        let carry = self.lfsr & 1 != 0;
        self.high = carry;
        self.lfsr >>= 1;

        if carry {
            self.lfsr ^= if self.frequency_control.get_bit(3) {
                0x60
            } else {
                0x6000
            };
        }

        if self.enabled {
            scheduler.schedule(
                self.frequency_event,
                EventKind::ApuNoiseTick,
                self.frequency_timer().saturating_sub(late).max(1),
            );
        }
    }

    pub fn step(&mut self) {
        if self.frequency_control.get_bit(14) && self.length_timer > 0 {
            self.length_timer -= 1;
            if self.length_timer == 0 {
                self.enabled = false;
            }
        }

        let envelope_period = self.length_envelope.get_bits(8..=10);
        if envelope_period != 0 && self.envelope_timer > 0 {
            self.envelope_timer -= 1;
            if self.envelope_timer == 0 {
                self.envelope_timer = envelope_period * 512;

                if self.length_envelope.get_bit(11) {
                    if self.current_volume < 15 {
                        self.current_volume += 1;
                    }
                } else if self.current_volume > 0 {
                    self.current_volume -= 1;
                }
            }
        }
    }

    #[must_use]
    pub fn amplitude(&self) -> i16 {
        if self.enabled {
            let volume = i16::from(self.current_volume);
            if self.high { volume } else { -volume }
        } else {
            0
        }
    }

    #[must_use]
    pub const fn active(&self) -> bool {
        self.enabled
    }

    fn restart(&mut self, scheduler: &mut Scheduler) {
        self.enabled = true;
        self.length_timer = (64 - (self.length_envelope & 0x3F)) * 128;
        self.current_volume = self.length_envelope.get_bits(12..=15) as u8;
        self.envelope_timer = self.length_envelope.get_bits(8..=10) * 512;
        self.lfsr = if self.frequency_control.get_bit(3) {
            0x40
        } else {
            0x4000
        };

        scheduler.schedule(
            self.frequency_event,
            EventKind::ApuNoiseTick,
            self.frequency_timer(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lfsr_repeats_with_the_documented_period() {
        let mut scheduler = Scheduler::new();
        let mut noise = Noise::new(&mut scheduler);
        noise.write8(0x5, 0x80, &mut scheduler);

        // A maximal 15-bit LFSR repeats after 2^15 - 1 clocks.
        let seed = noise.lfsr;
        let mut period = 0u32;
        loop {
            noise.tick(0, &mut scheduler);
            period += 1;
            if noise.lfsr == seed {
                break;
            }
            assert!(period < 0x8000);
        }
        assert_eq!(period, 0x7FFF);
    }

    #[test]
    fn short_mode_uses_a_7_bit_register() {
        let mut scheduler = Scheduler::new();
        let mut noise = Noise::new(&mut scheduler);
        noise.frequency_control = 0x8; // 7-bit counter
        noise.write8(0x5, 0x80, &mut scheduler);
        assert_eq!(noise.lfsr, 0x40);

        let seed = noise.lfsr;
        let mut period = 0u32;
        loop {
            noise.tick(0, &mut scheduler);
            period += 1;
            if noise.lfsr == seed {
                break;
            }
            assert!(period < 0x100);
        }
        assert_eq!(period, 0x7F);
    }
}
