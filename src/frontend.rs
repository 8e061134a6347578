//! Host-side implementations of the core's collaborator traits.
//!
//! Headless but real: the video sink keeps the latest complete frame behind
//! a mutex for whoever wants to display it, audio goes through a lock-free
//! single-producer/single-consumer ring (the consumer side would live on an
//! audio callback thread), input is a shared atomic the host thread can
//! poke, and saves land next to the ROM as a raw image.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use emu::interface::{AudioSink, InputSource, SaveSink, VideoSink};

pub const FRAME_WIDTH: usize = 240;
pub const FRAME_HEIGHT: usize = 160;

/// One RGBA frame.
pub type Frame = Vec<u32>;

/// Collects scanlines and publishes whole frames.
pub struct BufferedVideo {
    working: Frame,
    shared: Arc<Mutex<Frame>>,
}

impl BufferedVideo {
    pub fn new() -> (Self, Arc<Mutex<Frame>>) {
        let shared = Arc::new(Mutex::new(vec![0; FRAME_WIDTH * FRAME_HEIGHT]));
        (
            Self {
                working: vec![0; FRAME_WIDTH * FRAME_HEIGHT],
                shared: shared.clone(),
            },
            shared,
        )
    }
}

impl VideoSink for BufferedVideo {
    fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        if x < FRAME_WIDTH && y < FRAME_HEIGHT {
            self.working[y * FRAME_WIDTH + x] = color;
        }
    }

    fn set_line(&mut self, y: usize, colors: &[u32; 240]) {
        if y < FRAME_HEIGHT {
            self.working[y * FRAME_WIDTH..(y + 1) * FRAME_WIDTH].copy_from_slice(colors);
        }
    }

    fn present_frame(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.copy_from_slice(&self.working);
        }
    }
}

/// Producer half of a lock-free stereo sample ring. The audio thread drains
/// the consumer half; when the ring is full samples are dropped rather than
/// blocking emulation.
pub struct RingAudio {
    producer: rtrb::Producer<(f32, f32)>,
}

impl RingAudio {
    pub fn new(capacity: usize) -> (Self, rtrb::Consumer<(f32, f32)>) {
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        (Self { producer }, consumer)
    }
}

impl AudioSink for RingAudio {
    fn push_sample(&mut self, left: f32, right: f32) {
        let _ = self.producer.push((left, right));
    }

    fn set_sample_rate(&mut self, resolution: u32) {
        tracing::debug!("core mixes at {resolution} Hz");
    }
}

type ChangeFlag = Arc<Mutex<Option<Arc<AtomicBool>>>>;

/// Key state shared with whatever host thread owns the real input. Bits are
/// KEYINPUT-polarity: 1 = released.
pub struct SharedInput {
    keys: Arc<AtomicU16>,
    changed: ChangeFlag,
}

/// The host's side of [`SharedInput`]: update the keys from any thread.
pub struct InputHandle {
    keys: Arc<AtomicU16>,
    changed: ChangeFlag,
}

impl InputHandle {
    pub fn set_keys(&self, keys: u16) {
        self.keys.store(keys, Ordering::Relaxed);
        if let Some(flag) = self.changed.lock().unwrap().as_ref() {
            flag.store(true, Ordering::Release);
        }
    }
}

impl SharedInput {
    pub fn new() -> (Self, InputHandle) {
        let keys = Arc::new(AtomicU16::new(0x03FF));
        let changed: ChangeFlag = Arc::new(Mutex::new(None));
        (
            Self {
                keys: keys.clone(),
                changed: changed.clone(),
            },
            InputHandle { keys, changed },
        )
    }
}

impl InputSource for SharedInput {
    fn get_keys(&self) -> u16 {
        self.keys.load(Ordering::Relaxed)
    }

    fn on_input(&mut self, changed: Arc<AtomicBool>) {
        *self.changed.lock().unwrap() = Some(changed);
    }
}

/// Writes the save image to `<rom>.sav` whenever the core reports a
/// completed mutation.
pub struct FileSave {
    path: PathBuf,
}

impl FileSave {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SaveSink for FileSave {
    fn persist(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Err(error) = fs::write(&self.path, data) {
            tracing::warn!("failed to write save file {:?}: {error}", self.path);
        }
    }
}
