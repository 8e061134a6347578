//! The four DMA channels.
//!
//! Fixed priority 0 > 1 > 2 > 3. Each channel keeps the programmed
//! source/destination/length/control plus internal shadow copies latched on
//! the enable rising edge. Channel starts are delayed through a two-cycle
//! scheduler event; the actual beats are driven by the bus, which owns the
//! memory access path.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

// Internal memory only (27-bit) for channel 0, any memory (28-bit) otherwise.
const SOURCE_ADDRESS_MASK: [u32; 4] = [0x07FF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF];
const DESTINATION_ADDRESS_MASK: [u32; 4] = [0x07FF_FFFF, 0x07FF_FFFF, 0x07FF_FFFF, 0x0FFF_FFFF];
const LENGTH_MASK: [u16; 4] = [0x3FFF, 0x3FFF, 0x3FFF, 0xFFFF];

const FIFO_ADDRESSES: [u32; 2] = [0x0400_00A0, 0x0400_00A4];

/// Start timing from CNT_H bits 12-13.
const TIMING_IMMEDIATE: u16 = 0;
const TIMING_VBLANK: u16 = 1;
const TIMING_HBLANK: u16 = 2;
const TIMING_SPECIAL: u16 = 3;

#[derive(Serialize, Deserialize)]
pub struct Channel {
    pub source: u32,
    pub destination: u32,
    pub length: u16,
    pub control: u16,

    // Internal registers, latched when the enable bit rises.
    pub internal_source: u32,
    pub internal_destination: u32,
    pub internal_length: u32,

    pub active: bool,
    start_event: EventHandle,
}

impl Channel {
    fn new(scheduler: &mut Scheduler) -> Self {
        Self {
            source: 0,
            destination: 0,
            length: 0,
            control: 0,
            internal_source: 0,
            internal_destination: 0,
            internal_length: 0,
            active: false,
            start_event: scheduler.register_handle(),
        }
    }

    fn enabled(&self) -> bool {
        self.control.get_bit(15)
    }

    fn timing(&self) -> u16 {
        self.control.get_bits(12..=13)
    }

    pub fn repeats(&self) -> bool {
        self.control.get_bit(9)
    }

    pub fn irq_on_complete(&self) -> bool {
        self.control.get_bit(14)
    }

    pub fn word_transfer(&self) -> bool {
        self.control.get_bit(10)
    }

    fn reload_length(&self, index: usize) -> u32 {
        if self.length == 0 {
            if index == 3 { 0x1_0000 } else { 0x4000 }
        } else {
            u32::from(self.length & LENGTH_MASK[index])
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct Dma {
    pub channels: [Channel; 4],
}

impl Dma {
    pub fn new(scheduler: &mut Scheduler) -> Self {
        Self {
            channels: std::array::from_fn(|_| Channel::new(scheduler)),
        }
    }

    #[must_use]
    pub fn running(&self) -> bool {
        self.channels.iter().any(|channel| channel.active)
    }

    /// Highest-priority active channel, re-evaluated between beats.
    #[must_use]
    pub fn current_channel(&self) -> Option<usize> {
        (0..4).find(|&i| self.channels[i].active)
    }

    /// Channel `n` is in sound-FIFO mode: channels 1 and 2 with special
    /// timing, repeating, targeting one of the two FIFO registers.
    #[must_use]
    pub fn fifo_mode(&self, n: usize) -> bool {
        (n == 1 || n == 2)
            && self.channels[n].timing() == TIMING_SPECIAL
            && FIFO_ADDRESSES.contains(&self.channels[n].destination)
    }

    pub fn read8(&self, address: u32) -> u8 {
        let n = ((address - 0xB0) / 12) as usize;
        // Only the control register reads back; the rest is write-only.
        match (address - 0xB0) % 12 {
            0xA => self.channels[n].control.get_byte(0),
            0xB => self.channels[n].control.get_byte(1),
            _ => 0,
        }
    }

    pub fn write8(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        let n = ((address - 0xB0) / 12) as usize;
        let channel = &mut self.channels[n];
        let old_enable = channel.enabled();

        match (address - 0xB0) % 12 {
            0x0 => channel.source.set_byte(0, value),
            0x1 => channel.source.set_byte(1, value),
            0x2 => channel.source.set_byte(2, value),
            0x3 => {
                channel.source.set_byte(3, value);
                channel.source &= SOURCE_ADDRESS_MASK[n];
            }
            0x4 => channel.destination.set_byte(0, value),
            0x5 => channel.destination.set_byte(1, value),
            0x6 => channel.destination.set_byte(2, value),
            0x7 => {
                channel.destination.set_byte(3, value);
                channel.destination &= DESTINATION_ADDRESS_MASK[n];
            }
            0x8 => channel.length.set_byte(0, value),
            0x9 => channel.length.set_byte(1, value),
            0xA => channel.control.set_byte(0, value & 0xE0),
            0xB => channel.control.set_byte(1, value & if n == 3 { 0xFF } else { 0xF7 }),
            _ => unreachable!(),
        }

        if channel.enabled() && !old_enable {
            let align = if channel.word_transfer() { !3 } else { !1 };
            channel.internal_source = channel.source & align;
            channel.internal_destination = channel.destination & align;
            channel.internal_length = channel.reload_length(n);

            tracing::debug!(
                "DMA {n} enabled: {:08X} -> {:08X} x{} ({}-bit, timing {})",
                channel.source,
                channel.destination,
                channel.internal_length,
                if channel.word_transfer() { 32 } else { 16 },
                channel.timing(),
            );

            if channel.timing() == TIMING_IMMEDIATE {
                self.start_transfer(n, scheduler);
            }
        }
    }

    pub fn on_vblank(&mut self, scheduler: &mut Scheduler) {
        self.start_matching(TIMING_VBLANK, scheduler);
    }

    pub fn on_hblank(&mut self, scheduler: &mut Scheduler) {
        self.start_matching(TIMING_HBLANK, scheduler);
    }

    /// Video-capture trigger for channel 3 (lines 2-161).
    pub fn on_video_capture(&mut self, scheduler: &mut Scheduler) {
        let channel = &self.channels[3];
        if !channel.active && channel.enabled() && channel.timing() == TIMING_SPECIAL {
            self.start_transfer(3, scheduler);
        }
    }

    /// A sound FIFO ran low: restart the matching channel for a 4-word
    /// burst. `fifo` is 0 for FIFO A, 1 for FIFO B.
    pub fn on_fifo_request(&mut self, fifo: usize, scheduler: &mut Scheduler) {
        for n in 1..=2 {
            let channel = &mut self.channels[n];
            if channel.enabled()
                && channel.timing() == TIMING_SPECIAL
                && channel.destination == FIFO_ADDRESSES[fifo]
                && channel.repeats()
            {
                channel.internal_length = 4;
                self.start_transfer(n, scheduler);
            }
        }
    }

    fn start_matching(&mut self, timing: u16, scheduler: &mut Scheduler) {
        for n in 0..4 {
            let channel = &self.channels[n];
            if !channel.active && channel.enabled() && channel.timing() == timing {
                self.start_transfer(n, scheduler);
            }
        }
    }

    fn start_transfer(&self, n: usize, scheduler: &mut Scheduler) {
        scheduler.schedule(self.channels[n].start_event, EventKind::DmaStart(n), 2);
    }

    pub fn activate(&mut self, n: usize, now: u64) {
        tracing::trace!("DMA {n} started on cycle {now}");
        self.channels[n].active = true;
    }

    /// Bookkeeping after the last beat of a transfer. Returns true when the
    /// completion interrupt should be requested.
    pub fn finish_transfer(&mut self, n: usize, now: u64) -> bool {
        tracing::trace!("DMA {n} finished on cycle {now}");

        let fifo = self.fifo_mode(n);
        let channel = &mut self.channels[n];
        channel.active = false;

        if channel.repeats() {
            // Keep the enable bit and wait for the next trigger.
            channel.internal_length = channel.reload_length(n);
            if !fifo && channel.control.get_bits(5..=6) == 3 {
                let align = if channel.word_transfer() { !3 } else { !1 };
                channel.internal_destination = channel.destination & align;
            }
        } else {
            channel.control.set_bit(15, false);
        }

        channel.irq_on_complete()
    }
}
