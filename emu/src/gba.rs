//! The console: one structure owning the whole machine.
//!
//! Ownership is strictly tree-shaped — `Gba` owns the CPU, the CPU owns the
//! bus, the bus owns the scheduler and every peripheral — so cross-subsystem
//! calls never need shared references. One [`Gba::step`] makes one unit of
//! progress: a DMA beat while any channel is active, a hop to the next
//! scheduled event while halted, or one CPU instruction.

use std::fmt;

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::cartridge_header::CartridgeError;
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::hardware::internal_memory::BIOS_SIZE;
use crate::interface::{AudioSink, InputSource, SaveSink, VideoSink};

/// Master clock: one cycle per unit.
pub const CYCLES_PER_SECOND: u64 = 1 << 24;

/// 308 dots x 4 cycles x 228 lines.
pub const CYCLES_PER_FRAME: u64 = 280_896;

#[derive(Debug)]
pub enum StartupError {
    /// The BIOS image must be exactly 16 KiB.
    BadBiosSize(usize),
    Cartridge(CartridgeError),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadBiosSize(size) => write!(f, "invalid BIOS size: {size} bytes (expected 16384)"),
            Self::Cartridge(error) => write!(f, "bad cartridge: {error}"),
        }
    }
}

impl std::error::Error for StartupError {}

impl From<CartridgeError> for StartupError {
    fn from(error: CartridgeError) -> Self {
        Self::Cartridge(error)
    }
}

/// The complete system.
pub struct Gba {
    pub cpu: Arm7tdmi,
}

impl Gba {
    /// Builds the console. Without a BIOS image the CPU starts directly at
    /// the cartridge entry point with the post-boot register state.
    pub fn new(
        bios: Option<Vec<u8>>,
        rom: Vec<u8>,
        video: Box<dyn VideoSink + Send>,
        audio: Box<dyn AudioSink + Send>,
        input: Box<dyn InputSource + Send>,
        save_sink: Option<Box<dyn SaveSink + Send>>,
    ) -> Result<Self, StartupError> {
        let mut cartridge = Cartridge::new(rom)?;
        if let Some(sink) = save_sink {
            cartridge.set_save_sink(sink);
        }

        let mut bus = Bus::new(cartridge, video, audio, input);

        let skip_bios = match bios {
            Some(image) => {
                let loaded: &[u8; BIOS_SIZE] = image
                    .as_slice()
                    .try_into()
                    .map_err(|_| StartupError::BadBiosSize(image.len()))?;
                bus.internal_memory.load_bios(loaded);
                false
            }
            None => true,
        };

        let mut cpu = Arm7tdmi::new(bus);
        if skip_bios {
            cpu.skip_bios();
        }
        cpu.flush_pipeline();

        Ok(Self { cpu })
    }

    pub fn load_save(&mut self, image: &[u8]) {
        self.cpu.bus.cartridge.load_save(image);
    }

    /// One unit of progress. Active DMA preempts the CPU entirely; a halted
    /// CPU hands the clock to the scheduler until an interrupt pends.
    pub fn step(&mut self) {
        self.cpu.bus.poll_input();

        if self.cpu.bus.dma_running() {
            self.cpu.bus.dma_beat();
        } else if self.cpu.halted {
            self.cpu.bus.run_to_next_event();
            self.cpu.check_for_interrupt();
        } else {
            self.cpu.step();
        }
    }

    /// Run for at least `cycles` cycles (overshooting by at most one
    /// instruction); returns the cycles actually consumed.
    pub fn run(&mut self, cycles: u64) -> u64 {
        let start = self.cpu.bus.scheduler.now();
        let target = start + cycles;

        while self.cpu.bus.scheduler.now() < target {
            if self.cpu.halted && !self.cpu.bus.dma_running() {
                // Nothing to execute: jump the clock instead of spinning,
                // but never past the target.
                self.cpu.bus.poll_input();
                match self.cpu.bus.scheduler.next_event_time() {
                    Some(at) if at <= target => self.cpu.bus.run_to_next_event(),
                    _ => self.cpu.bus.tick(target - self.cpu.bus.scheduler.now()),
                }
                self.cpu.check_for_interrupt();
            } else {
                self.step();
            }
        }

        self.cpu.bus.scheduler.now() - start
    }

    /// Run one video frame.
    pub fn run_frame(&mut self) {
        self.run(CYCLES_PER_FRAME);
    }
}
