//! APU: the four PSG channels, the two DMA-sound FIFOs and the mixer.
//!
//! Mixing happens on a periodic scheduler event every 512 cycles
//! (~32.8 kHz): the PSG amplitudes and the latched FIFO samples are scaled
//! by the SOUNDCNT volume fields and pushed to the host audio sink as one
//! stereo pair. FIFO samples themselves are popped on timer overflows, and a
//! half-empty FIFO asks the DMA controller for a 4-word refill.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::interface::AudioSink;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

pub mod noise;
pub mod pulse;
pub mod wave;

use noise::Noise;
use pulse::Pulse;
use wave::Wave;

/// Cycles between mixer ticks (16.78 MHz / 512 = 32768 Hz).
pub const SAMPLE_PERIOD: u64 = 512;

/// Capacity of each DMA-sound FIFO, in samples.
const FIFO_DEPTH: usize = 8;

/// A FIFO refill is requested once at most this many samples remain.
const FIFO_REFILL_THRESHOLD: usize = 4;

#[derive(Default, Serialize, Deserialize)]
struct Fifo {
    samples: [i8; FIFO_DEPTH],
    head: usize,
    len: usize,
}

impl Fifo {
    fn push(&mut self, sample: i8) {
        if self.len == FIFO_DEPTH {
            return;
        }
        self.samples[(self.head + self.len) % FIFO_DEPTH] = sample;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<i8> {
        if self.len == 0 {
            return None;
        }
        let sample = self.samples[self.head];
        self.head = (self.head + 1) % FIFO_DEPTH;
        self.len -= 1;
        Some(sample)
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

pub struct Sound {
    pulse1: Pulse,
    pulse2: Pulse,
    wave: Wave,
    noise: Noise,

    /// SOUNDCNT_L: PSG master volume and per-channel L/R enables.
    pub control_stereo_volume: u16,
    /// SOUNDCNT_H: PSG volume shift, FIFO volume/enables/timer selects.
    pub control_mixing_dma: u16,
    /// SOUNDCNT_X: master enable plus read-only channel-active flags.
    pub control_sound_on: u16,
    /// SOUNDBIAS: stored, the bias conversion itself happens host-side.
    pub sound_pwm_control: u16,

    fifo_a: Fifo,
    fifo_b: Fifo,
    fifo_sample_a: i8,
    fifo_sample_b: i8,

    sink: Box<dyn AudioSink + Send>,
    sample_event: EventHandle,
}

impl Sound {
    pub fn new(mut sink: Box<dyn AudioSink + Send>, scheduler: &mut Scheduler) -> Self {
        sink.set_sample_rate((crate::gba::CYCLES_PER_SECOND / SAMPLE_PERIOD) as u32);

        let sample_event = scheduler.register_handle();
        scheduler.schedule(sample_event, EventKind::ApuSample, SAMPLE_PERIOD);

        Self {
            pulse1: Pulse::new(0, scheduler),
            pulse2: Pulse::new(1, scheduler),
            wave: Wave::new(scheduler),
            noise: Noise::new(scheduler),
            control_stereo_volume: 0,
            control_mixing_dma: 0,
            control_sound_on: 0,
            sound_pwm_control: 0x200,
            fifo_a: Fifo::default(),
            fifo_b: Fifo::default(),
            fifo_sample_a: 0,
            fifo_sample_b: 0,
            sink,
            sample_event,
        }
    }

    pub fn read8(&self, address: u32) -> u8 {
        match address {
            0x60..=0x65 => self.pulse1.read8(address - 0x60),
            0x68..=0x6D => self.pulse2.read8(address - 0x68),
            0x70..=0x75 => self.wave.read8(address - 0x70),
            0x78..=0x7D => self.noise.read8(address - 0x78),
            0x80 => self.control_stereo_volume.get_byte(0),
            0x81 => self.control_stereo_volume.get_byte(1),
            0x82 => self.control_mixing_dma.get_byte(0),
            0x83 => self.control_mixing_dma.get_byte(1),
            0x84 => self.status_byte(),
            0x88 => self.sound_pwm_control.get_byte(0),
            0x89 => self.sound_pwm_control.get_byte(1),
            0x90..=0x9F => self.wave.ram_read(address - 0x90),
            _ => 0,
        }
    }

    pub fn write8(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        // With the master enable off the PSG registers are write-protected;
        // the DMA-sound control, FIFOs and wave RAM stay reachable.
        if !self.master_enabled()
            && !matches!(address, 0x82..=0x84 | 0x88 | 0x89 | 0x90..=0xA7)
        {
            return;
        }

        match address {
            0x60..=0x65 => self.pulse1.write8(address - 0x60, value, scheduler),
            0x68..=0x6D => self.pulse2.write8(address - 0x68, value, scheduler),
            0x70..=0x75 => self.wave.write8(address - 0x70, value, scheduler),
            0x78..=0x7D => self.noise.write8(address - 0x78, value, scheduler),
            0x80 => self.control_stereo_volume.set_byte(0, value & 0x77),
            0x81 => self.control_stereo_volume.set_byte(1, value),
            0x82 => self.control_mixing_dma.set_byte(0, value & 0x0F),
            0x83 => {
                self.control_mixing_dma.set_byte(1, value);
                if value.get_bit(3) {
                    self.fifo_a.clear();
                }
                if value.get_bit(7) {
                    self.fifo_b.clear();
                }
                // Reset bits read back as zero.
                self.control_mixing_dma &= !0x8800;
            }
            0x84 => self.control_sound_on.set_bit(7, value.get_bit(7)),
            0x88 => self.sound_pwm_control.set_byte(0, value),
            0x89 => self.sound_pwm_control.set_byte(1, value),
            0x90..=0x9F => self.wave.ram_write(address - 0x90, value),
            0xA0..=0xA3 => self.fifo_a.push(value as i8),
            0xA4..=0xA7 => self.fifo_b.push(value as i8),
            _ => {}
        }
    }

    /// SOUNDCNT_X low byte: master enable plus live channel-active flags.
    fn status_byte(&self) -> u8 {
        let mut byte = self.control_sound_on.get_byte(0) & 0x80;
        byte.set_bit(0, self.pulse1.active());
        byte.set_bit(1, self.pulse2.active());
        byte.set_bit(2, self.wave.active());
        byte.set_bit(3, self.noise.active());
        byte
    }

    fn master_enabled(&self) -> bool {
        self.control_sound_on.get_bit(7)
    }

    /// A timer overflowed; pop a sample from each FIFO clocked by that
    /// timer. Returns `(refill_a, refill_b)` for the DMA controller.
    pub fn on_timer_overflow(&mut self, timer: usize) -> (bool, bool) {
        let mut refill = (false, false);

        if usize::from(self.control_mixing_dma.get_bit(10)) == timer {
            if let Some(sample) = self.fifo_a.pop() {
                self.fifo_sample_a = sample;
            }
            refill.0 = self.fifo_a.len <= FIFO_REFILL_THRESHOLD;
        }

        if usize::from(self.control_mixing_dma.get_bit(14)) == timer {
            if let Some(sample) = self.fifo_b.pop() {
                self.fifo_sample_b = sample;
            }
            refill.1 = self.fifo_b.len <= FIFO_REFILL_THRESHOLD;
        }

        refill
    }

    pub fn pulse_tick(&mut self, index: usize, late: u64, scheduler: &mut Scheduler) {
        if index == 0 {
            self.pulse1.tick(late, scheduler);
        } else {
            self.pulse2.tick(late, scheduler);
        }
    }

    pub fn wave_tick(&mut self, late: u64, scheduler: &mut Scheduler) {
        self.wave.tick(late, scheduler);
    }

    pub fn noise_tick(&mut self, late: u64, scheduler: &mut Scheduler) {
        self.noise.tick(late, scheduler);
    }

    /// Mixer tick: advance the frame-sequencer style counters and emit one
    /// stereo sample.
    pub fn sample_tick(&mut self, now: u64, late: u64, scheduler: &mut Scheduler) {
        self.pulse1.step();
        self.pulse2.step();
        self.wave.step();
        self.noise.step();

        let (left, right) = if self.master_enabled() {
            self.mix()
        } else {
            (0.0, 0.0)
        };
        self.sink.push_sample(left, right);

        scheduler.schedule_at(
            self.sample_event,
            EventKind::ApuSample,
            now - late + SAMPLE_PERIOD,
        );
    }

    fn mix(&self) -> (f32, f32) {
        let amplitudes = [
            self.pulse1.amplitude(),
            self.pulse2.amplitude(),
            self.wave.amplitude(),
            self.noise.amplitude(),
        ];

        // PSG volume shift: 25%, 50% or 100%.
        let psg_shift = match self.control_mixing_dma & 0b11 {
            0 => 2,
            1 => 1,
            _ => 0,
        };

        let mut left = 0i32;
        let mut right = 0i32;
        let master_left = i32::from(self.control_stereo_volume.get_bits(4..=6)) + 1;
        let master_right = i32::from(self.control_stereo_volume & 0b111) + 1;

        for (i, &amplitude) in amplitudes.iter().enumerate() {
            let amplitude = i32::from(amplitude) >> psg_shift;
            if self.control_stereo_volume.get_bit(12 + i as u8) {
                left += amplitude * master_left;
            }
            if self.control_stereo_volume.get_bit(8 + i as u8) {
                right += amplitude * master_right;
            }
        }

        // PSG range: 4 channels x 15 x 8.
        let mut left = left as f32 / 480.0;
        let mut right = right as f32 / 480.0;

        let fifo_a = f32::from(self.fifo_sample_a) / 128.0
            / if self.control_mixing_dma.get_bit(2) { 1.0 } else { 2.0 };
        let fifo_b = f32::from(self.fifo_sample_b) / 128.0
            / if self.control_mixing_dma.get_bit(3) { 1.0 } else { 2.0 };

        if self.control_mixing_dma.get_bit(9) {
            left += fifo_a;
        }
        if self.control_mixing_dma.get_bit(8) {
            right += fifo_a;
        }
        if self.control_mixing_dma.get_bit(13) {
            left += fifo_b;
        }
        if self.control_mixing_dma.get_bit(12) {
            right += fifo_b;
        }

        (left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::NullAudio;
    use pretty_assertions::assert_eq;

    fn make() -> (Sound, Scheduler) {
        let mut scheduler = Scheduler::new();
        let sound = Sound::new(Box::new(NullAudio), &mut scheduler);
        (sound, scheduler)
    }

    fn enable_master(sound: &mut Sound, scheduler: &mut Scheduler) {
        sound.write8(0x84, 0x80, scheduler);
    }

    #[test]
    fn registers_are_gated_on_master_enable() {
        let (mut sound, mut scheduler) = make();
        sound.write8(0x80, 0x77, &mut scheduler);
        assert_eq!(sound.control_stereo_volume, 0);

        enable_master(&mut sound, &mut scheduler);
        sound.write8(0x80, 0x77, &mut scheduler);
        assert_eq!(sound.control_stereo_volume, 0x77);
    }

    #[test]
    fn fifo_pops_on_the_selected_timer() {
        let (mut sound, mut scheduler) = make();
        enable_master(&mut sound, &mut scheduler);
        sound.write8(0x83, 0x40, &mut scheduler); // FIFO B on timer 1
        sound.write8(0xA0, 0x40, &mut scheduler);
        sound.write8(0xA0, 0x21, &mut scheduler);

        // FIFO A clocked by timer 0 (bit 10 clear).
        let (refill_a, refill_b) = sound.on_timer_overflow(0);
        assert_eq!(sound.fifo_sample_a, 0x40);
        assert!(refill_a);
        assert!(!refill_b);

        // Timer 1 overflow does nothing for FIFO A.
        sound.on_timer_overflow(1);
        assert_eq!(sound.fifo_sample_a, 0x40);
    }

    #[test]
    fn fifo_reset_bit_empties_the_queue() {
        let (mut sound, mut scheduler) = make();
        enable_master(&mut sound, &mut scheduler);
        for _ in 0..6 {
            sound.write8(0xA0, 7, &mut scheduler);
        }
        assert_eq!(sound.fifo_a.len, 6);

        sound.write8(0x83, 0x08, &mut scheduler);
        assert_eq!(sound.fifo_a.len, 0);
        // The reset bit itself does not stick.
        assert!(!sound.control_mixing_dma.get_bit(11));
    }

    #[test]
    fn fifo_drops_samples_beyond_capacity() {
        let (mut sound, mut scheduler) = make();
        enable_master(&mut sound, &mut scheduler);
        for i in 0..12 {
            sound.write8(0xA4, i, &mut scheduler);
        }
        assert_eq!(sound.fifo_b.len, FIFO_DEPTH);
    }

    #[test]
    fn sample_event_reschedules_itself() {
        let (mut sound, mut scheduler) = make();
        assert_eq!(scheduler.next_event_time(), Some(SAMPLE_PERIOD));

        scheduler.advance(SAMPLE_PERIOD);
        let event = scheduler.pop_due().unwrap();
        assert_eq!(event.kind, EventKind::ApuSample);
        sound.sample_tick(scheduler.now(), 0, &mut scheduler);
        assert_eq!(scheduler.next_event_time(), Some(SAMPLE_PERIOD * 2));
    }

    #[test]
    fn status_byte_tracks_channel_activity() {
        let (mut sound, mut scheduler) = make();
        enable_master(&mut sound, &mut scheduler);
        assert_eq!(sound.read8(0x84), 0x80);

        // Kick pulse 1.
        sound.write8(0x65, 0x80, &mut scheduler);
        assert_eq!(sound.read8(0x84), 0x81);
    }
}
