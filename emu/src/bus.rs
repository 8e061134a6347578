//! Memory bus: address decoding, access timing and MMIO dispatch.
//!
//! Every read or write charges its wait cycles on the scheduler *before*
//! touching memory, then drains any events that came due — so peripheral
//! state is always up to date when the access lands. The bus owns the
//! scheduler and every peripheral, which keeps the whole dispatch path free
//! of shared references.
//!
//! | Address range | Handler                  | Wait cycles              |
//! |---------------|--------------------------|--------------------------|
//! | `0x00` BIOS   | `InternalMemory` (+ open-bus protection) | 1        |
//! | `0x02` EWRAM  | `InternalMemory`         | 3 (8/16-bit), 6 (32-bit) |
//! | `0x03` IWRAM  | `InternalMemory`         | 1                        |
//! | `0x04` MMIO   | per-peripheral dispatch  | 1                        |
//! | `0x05` Palette| `Lcd`                    | 1                        |
//! | `0x06` VRAM   | `Lcd`                    | 1                        |
//! | `0x07` OAM    | `Lcd`                    | 1                        |
//! | `0x08+` cart  | `Cartridge`              | WAITCNT tables           |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bitwise::Bits;
use crate::cartridge::save::SaveMedia;
use crate::cartridge::{Access, Cartridge};
use crate::cpu::hardware::dma::Dma;
use crate::cpu::hardware::internal_memory::InternalMemory;
use crate::cpu::hardware::interrupt_control::{InterruptControl, IrqType};
use crate::cpu::hardware::keypad::Keypad;
use crate::cpu::hardware::lcd::Lcd;
use crate::cpu::hardware::serial::Serial;
use crate::cpu::hardware::sound::Sound;
use crate::cpu::hardware::timers::Timers;
use crate::interface::{AudioSink, InputSource, VideoSink};
use crate::scheduler::{EventKind, Scheduler};

/// The documented BIOS open-bus value after the boot sequence.
const BIOS_OPEN_BUS_RESET: u32 = 0xE129_F000;

pub struct Bus {
    pub scheduler: Scheduler,
    pub internal_memory: InternalMemory,
    pub cartridge: Cartridge,
    pub lcd: Lcd,
    pub sound: Sound,
    pub dma: Dma,
    pub timers: Timers,
    pub serial: Serial,
    pub keypad: Keypad,
    pub interrupt_control: InterruptControl,

    input: Box<dyn InputSource + Send>,
    input_changed: Arc<AtomicBool>,

    waitcnt: u16,
    /// The last instruction word successfully fetched from BIOS; returned
    /// for BIOS reads from outside and for unmapped addresses.
    bios_open_bus: u32,
    /// Tracks the executing PC for the BIOS read protection.
    current_pc: u32,
    halt_requested: bool,
}

impl Bus {
    pub fn new(
        cartridge: Cartridge,
        video: Box<dyn VideoSink + Send>,
        audio: Box<dyn AudioSink + Send>,
        mut input: Box<dyn InputSource + Send>,
    ) -> Self {
        let mut scheduler = Scheduler::new();
        let input_changed = Arc::new(AtomicBool::new(false));
        input.on_input(input_changed.clone());

        Self {
            lcd: Lcd::new(video, &mut scheduler),
            sound: Sound::new(audio, &mut scheduler),
            dma: Dma::new(&mut scheduler),
            timers: Timers::new(&mut scheduler),
            serial: Serial::new(&mut scheduler),
            keypad: Keypad::default(),
            interrupt_control: InterruptControl::default(),
            internal_memory: InternalMemory::default(),
            cartridge,
            input,
            input_changed,
            waitcnt: 0,
            bios_open_bus: BIOS_OPEN_BUS_RESET,
            current_pc: 0,
            halt_requested: false,
            scheduler,
        }
    }

    // -- Clock --------------------------------------------------------------

    /// Charge `cycles` and run everything that came due.
    pub fn tick(&mut self, cycles: u64) {
        self.scheduler.advance(cycles);
        self.process_events();
    }

    /// Jump straight to the next scheduled event (HALT and idle loops).
    pub fn run_to_next_event(&mut self) {
        self.scheduler.advance_to_next();
        self.process_events();
    }

    fn process_events(&mut self) {
        while let Some(event) = self.scheduler.pop_due() {
            let now = self.scheduler.now();
            let late = now - event.fire_at;

            match event.kind {
                EventKind::HblankStart => {
                    let output = self.lcd.hblank_start(now, late, &mut self.scheduler);
                    self.handle_lcd_output(&output);
                }
                EventKind::HblankEnd => {
                    let output = self.lcd.hblank_end(now, late, &mut self.scheduler);
                    self.handle_lcd_output(&output);
                }
                EventKind::TimerOverflow(timer) => {
                    let overflowed =
                        self.timers.handle_overflow(timer, late, &mut self.scheduler);
                    self.handle_timer_overflows(overflowed);
                }
                EventKind::DmaStart(channel) => self.dma.activate(channel, now),
                EventKind::ApuSample => self.sound.sample_tick(now, late, &mut self.scheduler),
                EventKind::ApuPulseTick(index) => {
                    self.sound.pulse_tick(index, late, &mut self.scheduler);
                }
                EventKind::ApuWaveTick => self.sound.wave_tick(late, &mut self.scheduler),
                EventKind::ApuNoiseTick => self.sound.noise_tick(late, &mut self.scheduler),
                EventKind::SioTransferDone => {
                    if self.serial.transfer_done() {
                        self.interrupt_control.request(IrqType::Serial);
                    }
                }
            }
        }
    }

    fn handle_lcd_output(&mut self, output: &crate::cpu::hardware::lcd::LcdEventOutput) {
        if output.request_hblank_irq {
            self.interrupt_control.request(IrqType::HBlank);
        }
        if output.request_vblank_irq {
            self.interrupt_control.request(IrqType::VBlank);
        }
        if output.request_vcount_irq {
            self.interrupt_control.request(IrqType::VCount);
        }
        if output.notify_dma_hblank {
            self.dma.on_hblank(&mut self.scheduler);
        }
        if output.notify_dma_vblank {
            self.dma.on_vblank(&mut self.scheduler);
        }
        if output.notify_dma_video {
            self.dma.on_video_capture(&mut self.scheduler);
        }
    }

    fn handle_timer_overflows(&mut self, overflowed: u8) {
        for timer in 0..4 {
            if overflowed & (1 << timer) == 0 {
                continue;
            }
            if self.timers.irq_enabled(timer) {
                self.interrupt_control.request(IrqType::timer(timer));
            }
            let (refill_a, refill_b) = self.sound.on_timer_overflow(timer);
            if refill_a {
                self.dma.on_fifo_request(0, &mut self.scheduler);
            }
            if refill_b {
                self.dma.on_fifo_request(1, &mut self.scheduler);
            }
        }
    }

    // -- CPU-facing state ---------------------------------------------------

    pub const fn set_current_pc(&mut self, pc: u32) {
        self.current_pc = pc;
    }

    pub fn take_halt_request(&mut self) -> bool {
        std::mem::take(&mut self.halt_requested)
    }

    /// Re-evaluates the keypad interrupt when the host reported an input
    /// change. Called once per console step.
    pub fn poll_input(&mut self) {
        if self.input_changed.swap(false, Ordering::Acquire) {
            self.check_keypad_interrupt();
        }
    }

    fn check_keypad_interrupt(&mut self) {
        if self.keypad.interrupt_condition_met(self.input.get_keys()) {
            self.interrupt_control.request(IrqType::Keypad);
        }
    }

    // -- Timed accesses -----------------------------------------------------

    fn wait_cycles(&self, address: u32, size: u32, access: Access) -> u64 {
        1 + match address >> 24 {
            0x2 => {
                if size == 4 {
                    5
                } else {
                    2
                }
            }
            0x8..=0xF => self.cartridge.access_cycles(address, size, access),
            _ => 0,
        }
    }

    fn read(&mut self, address: u32, size: u32, access: Access) -> u32 {
        self.tick(self.wait_cycles(address, size, access));
        self.read_raw(address, size)
    }

    fn write(&mut self, address: u32, value: u32, size: u32, access: Access) {
        self.tick(self.wait_cycles(address, size, access));
        self.write_raw(address, value, size);
    }

    pub fn read_byte(&mut self, address: u32, access: Access) -> u8 {
        self.read(address, 1, access) as u8
    }

    pub fn read_half_word(&mut self, address: u32, access: Access) -> u16 {
        self.read(address, 2, access) as u16
    }

    pub fn read_word(&mut self, address: u32, access: Access) -> u32 {
        self.read(address, 4, access)
    }

    /// Word load with the architectural unaligned rotation.
    pub fn read_word_rotated(&mut self, address: u32, access: Access) -> u32 {
        self.read_word(address, access)
            .rotate_right((address & 3) * 8)
    }

    /// Halfword load rotated within a word, as LDRH does at odd addresses.
    pub fn read_half_word_rotated(&mut self, address: u32, access: Access) -> u32 {
        u32::from(self.read_half_word(address, access)).rotate_right((address & 1) * 8)
    }

    pub fn write_byte(&mut self, address: u32, value: u8, access: Access) {
        self.write(address, u32::from(value), 1, access);
    }

    pub fn write_half_word(&mut self, address: u32, value: u16, access: Access) {
        self.write(address, u32::from(value), 2, access);
    }

    pub fn write_word(&mut self, address: u32, value: u32, access: Access) {
        self.write(address, value, 4, access);
    }

    /// Internal cycles with no bus activity (multiplies and the like).
    pub fn idle(&mut self, cycles: u64) {
        self.tick(cycles);
    }

    // -- Untimed routing ----------------------------------------------------

    pub fn read_raw(&mut self, address: u32, size: u32) -> u32 {
        let address = address & !(size - 1);

        match address >> 24 {
            0x0 => {
                if address >= 0x4000 {
                    return self.open_bus(size);
                }
                if self.current_pc >= 0x4000 {
                    return self.open_bus(size);
                }
                // A successful BIOS fetch refreshes the protection value.
                let word_base = address & !3;
                self.bios_open_bus = u32::from_le_bytes(std::array::from_fn(|i| {
                    self.internal_memory.bios_read(word_base + i as u32)
                }));
                self.compose(size, |memory, i| memory.internal_memory.bios_read(address + i))
            }
            0x2 => self.compose(size, |memory, i| memory.internal_memory.ewram_read(address + i)),
            0x3 => self.compose(size, |memory, i| memory.internal_memory.iwram_read(address + i)),
            0x4 => {
                let offset = address & 0x00FF_FFFF;
                if offset >= 0x400 {
                    return self.open_bus(size);
                }
                let mut value = 0;
                for i in 0..size {
                    value |= u32::from(self.read_io(offset + i)) << (i * 8);
                }
                value
            }
            0x5 => self.compose(size, |bus, i| bus.lcd.palette_read(address + i)),
            0x6 => self.compose(size, |bus, i| bus.lcd.vram_read(address + i)),
            0x7 => self.compose(size, |bus, i| bus.lcd.oam_read(address + i)),
            0x8..=0xF => self.cartridge.read(address, size),
            _ => self.open_bus(size),
        }
    }

    pub fn write_raw(&mut self, address: u32, value: u32, size: u32) {
        let address = address & !(size - 1);

        match address >> 24 {
            0x0 => {} // BIOS is read-only
            0x2 => {
                for i in 0..size {
                    self.internal_memory
                        .ewram_write(address + i, value.get_byte(i as u8));
                }
            }
            0x3 => {
                for i in 0..size {
                    self.internal_memory
                        .iwram_write(address + i, value.get_byte(i as u8));
                }
            }
            0x4 => {
                let offset = address & 0x00FF_FFFF;
                if offset >= 0x400 {
                    return;
                }
                for i in 0..size {
                    self.write_io(offset + i, value.get_byte(i as u8));
                }
            }
            0x5 => {
                if size == 1 {
                    self.lcd.palette_write_byte(address, value as u8);
                } else {
                    for i in 0..size {
                        self.lcd.palette_write(address + i, value.get_byte(i as u8));
                    }
                }
            }
            0x6 => {
                if size == 1 {
                    self.lcd.vram_write_byte(address, value as u8);
                } else {
                    for i in 0..size {
                        self.lcd.vram_write(address + i, value.get_byte(i as u8));
                    }
                }
            }
            0x7 => {
                // Byte writes to OAM are dropped.
                if size != 1 {
                    for i in 0..size {
                        self.lcd.oam_write(address + i, value.get_byte(i as u8));
                    }
                }
            }
            0x8..=0xF => self.cartridge.write(address, value, size),
            _ => {
                tracing::trace!("write to unmapped address {address:08X}");
            }
        }
    }

    fn compose(&self, size: u32, read: impl Fn(&Self, u32) -> u8) -> u32 {
        let mut value = 0;
        for i in 0..size {
            value |= u32::from(read(self, i)) << (i * 8);
        }
        value
    }

    fn open_bus(&self, size: u32) -> u32 {
        self.bios_open_bus & (!0u32 >> (32 - size * 8))
    }

    // -- MMIO dispatch ------------------------------------------------------

    fn read_io(&mut self, offset: u32) -> u8 {
        match offset {
            0x000..=0x057 => self.lcd.read_io(offset),
            0x060..=0x0A7 => self.sound.read8(offset),
            0x0B0..=0x0DF => self.dma.read8(offset),
            0x100..=0x10F => self.timers.read8(offset, self.scheduler.now()),
            0x120..=0x12D | 0x134..=0x15B => self.serial.read8(offset),
            0x130 => self.input.get_keys().get_byte(0),
            0x131 => self.input.get_keys().get_byte(1),
            0x132 => self.keypad.key_interrupt_control.get_byte(0),
            0x133 => self.keypad.key_interrupt_control.get_byte(1),
            0x200 => self.interrupt_control.interrupt_enable.get_byte(0),
            0x201 => self.interrupt_control.interrupt_enable.get_byte(1),
            0x202 => self.interrupt_control.interrupt_request.get_byte(0),
            0x203 => self.interrupt_control.interrupt_request.get_byte(1),
            0x204 => self.waitcnt.get_byte(0),
            0x205 => self.waitcnt.get_byte(1),
            0x208 => self.interrupt_control.interrupt_master_enable.get_byte(0),
            0x209 => self.interrupt_control.interrupt_master_enable.get_byte(1),
            0x300 => self.interrupt_control.post_boot_flag,
            _ => {
                tracing::trace!("read from unused IO register 0x04{offset:06X}");
                0
            }
        }
    }

    fn write_io(&mut self, offset: u32, value: u8) {
        match offset {
            0x000..=0x057 => self.lcd.write_io(offset, value),
            0x060..=0x0A7 => self.sound.write8(offset, value, &mut self.scheduler),
            0x0B0..=0x0DF => self.dma.write8(offset, value, &mut self.scheduler),
            0x100..=0x10F => self.timers.write8(offset, value, &mut self.scheduler),
            0x120..=0x12D | 0x134..=0x15B => {
                self.serial.write8(offset, value, &mut self.scheduler);
            }
            // KEYINPUT is read-only; KEYCNT re-evaluates the condition.
            0x130 | 0x131 => {}
            0x132 | 0x133 => {
                self.keypad
                    .write_control_byte((offset - 0x132) as u8, value);
                self.check_keypad_interrupt();
            }
            0x200 => self.interrupt_control.interrupt_enable.set_byte(0, value),
            0x201 => self.interrupt_control.interrupt_enable.set_byte(1, value),
            0x202 => self.interrupt_control.acknowledge_byte(0, value),
            0x203 => self.interrupt_control.acknowledge_byte(1, value),
            0x204 => {
                self.waitcnt.set_byte(0, value);
                self.cartridge.update_waitstates(self.waitcnt);
            }
            0x205 => {
                // Bit 15 (game pak type) is strapped, not writable.
                self.waitcnt.set_byte(1, value & 0x7F);
                self.cartridge.update_waitstates(self.waitcnt);
            }
            0x208 => {
                self.interrupt_control
                    .interrupt_master_enable
                    .set_byte(0, value);
            }
            0x209 => {
                self.interrupt_control
                    .interrupt_master_enable
                    .set_byte(1, value);
            }
            0x300 => self.interrupt_control.post_boot_flag = value,
            0x301 => {
                // HALTCNT: bit 7 clear = halt, set = stop (treated the same).
                if value >> 7 == 0 {
                    self.halt_requested = true;
                }
            }
            _ => {
                tracing::trace!("write to unused IO register 0x04{offset:06X}");
            }
        }
    }

    // -- DMA ----------------------------------------------------------------

    #[must_use]
    pub fn dma_running(&self) -> bool {
        self.dma.running()
    }

    /// One DMA beat on the highest-priority active channel: a single read
    /// and write, address adjustment, and completion bookkeeping.
    pub fn dma_beat(&mut self) {
        let Some(n) = self.dma.current_channel() else {
            return;
        };

        let fifo = self.dma.fifo_mode(n);
        let channel = &self.dma.channels[n];
        let word = channel.word_transfer() || fifo;
        let source = channel.internal_source;
        let destination = channel.internal_destination;

        // Reading through the cartridge forces the source to increment.
        let control = if source >= 0x0800_0000 {
            channel.control & !0x180
        } else {
            channel.control
        };
        let source_adjust = control.get_bits(7..=8);
        let destination_adjust = if fifo { 2 } else { control.get_bits(5..=6) };

        if word {
            let value = self.read_word(source, Access::Sequential);
            self.write_word(destination, value, Access::Sequential);
        } else {
            let value = self.read_half_word(source, Access::Sequential);
            self.write_half_word(destination, value, Access::Sequential);
        }

        let amount = if word { 4 } else { 2 };
        let channel = &mut self.dma.channels[n];
        channel.internal_source = adjust_address(source, source_adjust, amount);
        channel.internal_destination = adjust_address(destination, destination_adjust, amount);
        channel.internal_length -= 1;

        if channel.internal_length == 0
            && self.dma.finish_transfer(n, self.scheduler.now())
        {
            self.interrupt_control.request(IrqType::dma(n));
        }
    }

    // -- Save media passthrough --------------------------------------------

    pub const fn save_media(&self) -> &SaveMedia {
        &self.cartridge.save
    }
}

const fn adjust_address(address: u32, adjust: u16, amount: u32) -> u32 {
    match adjust {
        // Increment, and increment-with-reload (the reload happens at
        // transfer completion).
        0 | 3 => address.wrapping_add(amount),
        1 => address.wrapping_sub(amount),
        _ => address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{IdleInput, NullAudio, NullVideo};
    use pretty_assertions::assert_eq;

    fn make_bus() -> Bus {
        let mut rom = vec![0u8; 0x4000];
        rom[0xB2] = 0x96;
        let cartridge = Cartridge::new(rom).unwrap();
        Bus::new(
            cartridge,
            Box::new(NullVideo),
            Box::new(NullAudio),
            Box::new(IdleInput),
        )
    }

    #[test]
    fn ram_round_trips_at_every_width() {
        let mut bus = make_bus();
        bus.write_word(0x0200_0000, 0xDEAD_BEEF, Access::NonSequential);
        assert_eq!(bus.read_word(0x0200_0000, Access::NonSequential), 0xDEAD_BEEF);
        assert_eq!(bus.read_half_word(0x0200_0002, Access::NonSequential), 0xDEAD);
        assert_eq!(bus.read_byte(0x0200_0003, Access::NonSequential), 0xDE);

        bus.write_byte(0x0300_0100, 0x42, Access::NonSequential);
        assert_eq!(bus.read_byte(0x0300_0100, Access::NonSequential), 0x42);
    }

    #[test]
    fn unaligned_word_loads_rotate() {
        let mut bus = make_bus();
        bus.write_word(0x0300_0000, 0x1122_3344, Access::NonSequential);
        assert_eq!(
            bus.read_word_rotated(0x0300_0001, Access::NonSequential),
            0x4411_2233
        );
        assert_eq!(
            bus.read_half_word_rotated(0x0300_0001, Access::NonSequential),
            0x4400_0033
        );
    }

    #[test]
    fn ewram_charges_its_waitstates() {
        let mut bus = make_bus();
        let before = bus.scheduler.now();
        let _ = bus.read_half_word(0x0200_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 3);

        let before = bus.scheduler.now();
        let _ = bus.read_word(0x0200_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 6);

        let before = bus.scheduler.now();
        let _ = bus.read_word(0x0300_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 1);
    }

    #[test]
    fn rom_timing_follows_waitcnt() {
        let mut bus = make_bus();
        let before = bus.scheduler.now();
        let _ = bus.read_half_word(0x0800_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 5); // 1 + 4

        let before = bus.scheduler.now();
        let _ = bus.read_half_word(0x0800_0002, Access::Sequential);
        assert_eq!(bus.scheduler.now() - before, 3); // 1 + 2

        // WS0 3/1.
        bus.write_half_word(0x0400_0204, 0b0001_0100, Access::NonSequential);
        let before = bus.scheduler.now();
        let _ = bus.read_word(0x0800_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 5); // 1 + 3 + 1
    }

    #[test]
    fn bios_reads_are_protected_outside_bios() {
        let mut bus = make_bus();
        bus.set_current_pc(0x0800_0000);
        assert_eq!(bus.read_word(0x0000_0000, Access::NonSequential), BIOS_OPEN_BUS_RESET);

        // From inside the BIOS the actual bytes show and refresh the
        // protection value.
        bus.internal_memory.load_bios(&{
            let mut bios = [0u8; 0x4000];
            bios[0..4].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
            bios
        });
        bus.set_current_pc(0x0000_0100);
        assert_eq!(bus.read_word(0x0000_0000, Access::NonSequential), 0xCAFE_BABE);

        bus.set_current_pc(0x0800_0000);
        assert_eq!(bus.read_word(0x0000_0000, Access::NonSequential), 0xCAFE_BABE);
    }

    #[test]
    fn unmapped_reads_return_open_bus() {
        let mut bus = make_bus();
        assert_eq!(bus.read_word(0x0100_0000, Access::NonSequential), BIOS_OPEN_BUS_RESET);
        assert_eq!(
            bus.read_half_word(0x1000_0000, Access::NonSequential),
            BIOS_OPEN_BUS_RESET as u16
        );
    }

    #[test]
    fn oam_ignores_byte_writes_palette_duplicates_them() {
        let mut bus = make_bus();
        bus.write_byte(0x0700_0000, 0x55, Access::NonSequential);
        assert_eq!(bus.read_half_word(0x0700_0000, Access::NonSequential), 0);

        bus.write_byte(0x0500_0001, 0x77, Access::NonSequential);
        assert_eq!(bus.read_half_word(0x0500_0000, Access::NonSequential), 0x7777);
    }

    #[test]
    fn interrupt_flags_are_write_one_to_clear() {
        let mut bus = make_bus();
        bus.interrupt_control.request(IrqType::VBlank);
        bus.interrupt_control.request(IrqType::Timer0);
        assert_eq!(bus.read_half_word(0x0400_0202, Access::NonSequential), 0b1001);

        bus.write_half_word(0x0400_0202, 0b0001, Access::NonSequential);
        assert_eq!(bus.read_half_word(0x0400_0202, Access::NonSequential), 0b1000);
    }

    #[test]
    fn haltcnt_sets_the_halt_request() {
        let mut bus = make_bus();
        bus.write_byte(0x0400_0301, 0x00, Access::NonSequential);
        assert!(bus.take_halt_request());
        assert!(!bus.take_halt_request());
    }

    #[test]
    fn dma_immediate_transfer_copies_a_block() {
        let mut bus = make_bus();
        for i in 0..16u32 {
            bus.write_word(0x0200_0000 + i * 4, 0x1111_0000 + i, Access::NonSequential);
        }

        bus.write_word(0x0400_00B0, 0x0200_0000, Access::NonSequential);
        bus.write_word(0x0400_00B4, 0x0300_0000, Access::NonSequential);
        // Length 16, 32-bit, immediate, IRQ on complete.
        bus.write_word(0x0400_00B8, 0xC400_0000 | 16, Access::NonSequential);

        assert!(!bus.dma_running());
        bus.run_to_next_event();
        assert!(bus.dma_running());

        while bus.dma_running() {
            bus.dma_beat();
        }

        for i in 0..16u32 {
            assert_eq!(
                bus.read_word(0x0300_0000 + i * 4, Access::NonSequential),
                0x1111_0000 + i
            );
        }
        // Enable bit cleared, completion IRQ requested.
        assert_eq!(
            bus.read_half_word(0x0400_00BA, Access::NonSequential) & 0x8000,
            0
        );
        assert!(bus.interrupt_control.interrupt_request.get_bit(8));
    }

    #[test]
    fn timer_writes_reach_the_timers_and_raise_irqs() {
        let mut bus = make_bus();
        // Timer 0: reload 0xFFFE, IRQ enable, enable.
        bus.write_half_word(0x0400_0100, 0xFFFE, Access::NonSequential);
        bus.write_half_word(0x0400_0102, 0x00C0, Access::NonSequential);

        bus.idle(4);
        assert!(bus.interrupt_control.interrupt_request.get_bit(3));
    }

    #[test]
    fn keypad_control_write_can_raise_the_irq() {
        struct AllPressed;
        impl InputSource for AllPressed {
            fn get_keys(&self) -> u16 {
                0 // every button down
            }
        }

        let mut rom = vec![0u8; 0x1000];
        rom[0xB2] = 0x96;
        let mut bus = Bus::new(
            Cartridge::new(rom).unwrap(),
            Box::new(NullVideo),
            Box::new(NullAudio),
            Box::new(AllPressed),
        );

        // Select button A, OR mode, IRQ enable.
        bus.write_half_word(0x0400_0132, 0x4001, Access::NonSequential);
        assert!(bus.interrupt_control.interrupt_request.get_bit(12));
    }

    #[test]
    fn keyinput_reflects_the_source() {
        let mut bus = make_bus();
        assert_eq!(bus.read_half_word(0x0400_0130, Access::NonSequential), 0x03FF);
    }
}
