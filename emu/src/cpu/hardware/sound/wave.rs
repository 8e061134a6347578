//! Wave output channel (channel 3): plays 4-bit samples out of a small
//! banked RAM. The GBA extends the classic channel with a two-bank mode and
//! a forced-75% volume setting.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

#[derive(Serialize, Deserialize)]
pub struct Wave {
    pub stop_wave_ram_select: u16,
    pub length_volume: u16,
    pub frequency_control: u16,
    pub wave_ram: [u8; 32],
    enabled: bool,
    sample_position: u8,
    current_sample: u8,
    length_timer: u16,
    frequency_event: EventHandle,
}

impl Wave {
    pub fn new(scheduler: &mut Scheduler) -> Self {
        Self {
            stop_wave_ram_select: 0,
            length_volume: 0,
            frequency_control: 0,
            wave_ram: [0; 32],
            enabled: false,
            sample_position: 0,
            current_sample: 0,
            length_timer: 0,
            frequency_event: scheduler.register_handle(),
        }
    }

    pub fn read8(&self, offset: u32) -> u8 {
        match offset {
            0x0 => self.stop_wave_ram_select.get_byte(0) & 0xE0,
            0x3 => self.length_volume.get_byte(1) & 0xE0,
            0x5 => self.frequency_control.get_byte(1) & 0x40,
            _ => 0,
        }
    }

    pub fn write8(&mut self, offset: u32, value: u8, scheduler: &mut Scheduler) {
        match offset {
            0x0 => self.stop_wave_ram_select.set_byte(0, value & 0xE0),
            0x2 => self.length_volume.set_byte(0, value),
            0x3 => self.length_volume.set_byte(1, value),
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

    /// Wave RAM accesses go to the bank that is *not* selected for playback.
    pub fn ram_read(&self, offset: u32) -> u8 {
        self.wave_ram[self.ram_index(offset)]
    }

    pub fn ram_write(&mut self, offset: u32, value: u8) {
        let index = self.ram_index(offset);
        self.wave_ram[index] = value;
    }

    fn ram_index(&self, offset: u32) -> usize {
        let bank = usize::from(!self.stop_wave_ram_select.get_bit(6)) * 16;
        (offset as usize & 0xF) + bank
    }

    const fn frequency_timer(&self) -> u64 {
        // Wave samples clock twice as fast as the pulse phase steps.
        (2048 - (self.frequency_control & 0x7FF) as u64) * 8
    }

    pub fn tick(&mut self, late: u64, scheduler: &mut Scheduler) {
        let two_banks = self.stop_wave_ram_select.get_bit(5);
        let samples: u8 = if two_banks { 64 } else { 32 };
        self.sample_position = (self.sample_position + 1) % samples;

        let mut index = usize::from(self.sample_position / 2);
        if !two_banks {
            // Single-bank mode plays only the selected bank.
            index += usize::from(self.stop_wave_ram_select.get_bit(6)) * 16;
        }
        let byte = self.wave_ram[index];
        self.current_sample = if self.sample_position % 2 == 0 {
            byte >> 4
        } else {
            byte & 0xF
        };

        if self.enabled {
            scheduler.schedule(
                self.frequency_event,
                EventKind::ApuWaveTick,
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
    }

    #[must_use]
    pub fn amplitude(&self) -> i16 {
        if !self.enabled || !self.stop_wave_ram_select.get_bit(7) {
            return 0;
        }

        // Volume: 0%, 100%, 50%, 25%, or forced 75%.
        let sample = i16::from(self.current_sample) - 8;
        if self.length_volume.get_bit(15) {
            sample * 3 / 4
        } else {
            match self.length_volume.get_bits(13..=14) {
                0 => 0,
                1 => sample,
                2 => sample / 2,
                _ => sample / 4,
            }
        }
    }

    #[must_use]
    pub const fn active(&self) -> bool {
        self.enabled
    }

    fn restart(&mut self, scheduler: &mut Scheduler) {
        self.enabled = true;
        self.sample_position = 0;
        self.length_timer = (256 - (self.length_volume & 0xFF)) * 32;

        scheduler.schedule(
            self.frequency_event,
            EventKind::ApuWaveTick,
            self.frequency_timer(),
        );
    }
}
