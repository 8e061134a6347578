//! Collaborator traits at the edge of the core.
//!
//! The core never owns a window, an audio device, or a file. It talks to the
//! host exclusively through these traits, always synchronously and always
//! from the emulation thread. The host side decides whether to copy, buffer
//! or drop what it is handed.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Display output. `set_line` receives one finished 240-pixel scanline at a
/// time (0xRRGGBBAA, already expanded from 15-bit color); `present_frame` is
/// called once per frame when the PPU enters VBlank.
pub trait VideoSink {
    fn set_pixel(&mut self, x: usize, y: usize, color: u32);
    fn set_line(&mut self, y: usize, colors: &[u32; 240]);
    fn present_frame(&mut self);
}

/// Audio output. One `push_sample` per mixer tick (~32.8 kHz).
pub trait AudioSink {
    fn push_sample(&mut self, left: f32, right: f32);
    fn set_sample_rate(&mut self, resolution: u32);
}

/// Button state provider. The host may mutate its key state from another
/// thread; `get_keys` must be safe to call concurrently with that.
pub trait InputSource {
    /// Returns the keys in KEYINPUT format: bit i = 1 means button i is
    /// *not* pressed, bits 0-9 used.
    fn get_keys(&self) -> u16;

    /// Hands the host a flag to raise whenever the key state changes, so
    /// the keypad interrupt condition can be re-evaluated promptly. Sources
    /// that never change (headless runs) can ignore it.
    fn on_input(&mut self, changed: Arc<AtomicBool>) {
        let _ = changed;
    }
}

/// Receiver for save-media mutations. Called with the full backing image
/// after a write completes; the sink decides when to actually hit disk.
pub trait SaveSink {
    fn persist(&mut self, data: &[u8]);
}

/// Sink that throws frames away. Handy for tests and headless runs.
#[derive(Default)]
pub struct NullVideo;

impl VideoSink for NullVideo {
    fn set_pixel(&mut self, _x: usize, _y: usize, _color: u32) {}
    fn set_line(&mut self, _y: usize, _colors: &[u32; 240]) {}
    fn present_frame(&mut self) {}
}

#[derive(Default)]
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn push_sample(&mut self, _left: f32, _right: f32) {}
    fn set_sample_rate(&mut self, _resolution: u32) {}
}

/// Input source with no buttons ever pressed.
#[derive(Default)]
pub struct IdleInput;

impl InputSource for IdleInput {
    fn get_keys(&self) -> u16 {
        0x03FF
    }
}

#[derive(Default)]
pub struct DiscardSave;

impl SaveSink for DiscardSave {
    fn persist(&mut self, _data: &[u8]) {}
}
