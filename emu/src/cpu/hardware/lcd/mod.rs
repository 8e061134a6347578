//! LCD controller (PPU): scanline rendering driven by two alternating
//! scheduler events.
//!
//! Timing per scanline: 240 visible dots (960 cycles), then 68 dots of
//! horizontal blank (272 cycles). 228 scanlines per frame, lines 160-227
//! vertical blank, for 280_896 cycles per frame (~59.73 Hz).
//!
//! *HblankStart* (dot 240) raises the HBlank flag, requests the HBlank
//! interrupt, composes the scanline and hands it to the video sink.
//! *HblankEnd* (dot 308) advances VCOUNT, evaluates the VCount match, and
//! on entering line 160 raises VBlank and presents the frame.

use serde::{Deserialize, Serialize};
use serde_with::{Bytes, serde_as};

use crate::bitwise::Bits;
use crate::interface::VideoSink;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

pub mod background;
pub mod object;
pub mod registers;
mod window;

use background::Background;
use object::{GfxMode, ObjectAttributes};
use registers::Registers;

/// GBA display width.
pub const LCD_WIDTH: usize = 240;

/// GBA display height.
pub const LCD_HEIGHT: usize = 160;

pub const PALETTE_RAM_SIZE: usize = 0x400;
pub const VIDEO_RAM_SIZE: usize = 0x1_8000;
pub const OAM_SIZE: usize = 0x400;

/// Cycles spent drawing 240 dots.
const HDRAW_CYCLES: u64 = 960;
/// Cycles spent in horizontal blank (68 dots).
const HBLANK_CYCLES: u64 = 272;

const TOTAL_LINES: u8 = 228;

/// Sentinel priority meaning "no object pixel here" (real priorities are
/// 0-3).
const NO_OBJ: u8 = 6;

/// What a fired LCD event asks the bus to do.
#[derive(Default)]
pub struct LcdEventOutput {
    pub request_hblank_irq: bool,
    pub request_vblank_irq: bool,
    pub request_vcount_irq: bool,
    pub notify_dma_hblank: bool,
    pub notify_dma_vblank: bool,
    pub notify_dma_video: bool,
}

/// The PPU's own memories, serializable as one snapshot.
#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct LcdMemory {
    #[serde_as(as = "Bytes")]
    pub palette_ram: [u8; PALETTE_RAM_SIZE],
    #[serde_as(as = "Bytes")]
    pub video_ram: [u8; VIDEO_RAM_SIZE],
    #[serde_as(as = "Bytes")]
    pub object_attributes: [u8; OAM_SIZE],
}

impl Default for LcdMemory {
    fn default() -> Self {
        Self {
            palette_ram: [0; PALETTE_RAM_SIZE],
            video_ram: [0; VIDEO_RAM_SIZE],
            object_attributes: [0; OAM_SIZE],
        }
    }
}

pub struct Lcd {
    pub registers: Registers,
    pub(crate) memory: LcdMemory,

    video: Box<dyn VideoSink + Send>,
    hblank_start_event: EventHandle,
    hblank_end_event: EventHandle,

    // Scanline scratch buffers.
    win_line: [u8; LCD_WIDTH],
    bg_line: [[u8; LCD_WIDTH]; 4],
    bitmap_line: [u16; LCD_WIDTH],
    obj_line: [u8; LCD_WIDTH],
    obj_priority: [u8; LCD_WIDTH],
    obj_alpha: [bool; LCD_WIDTH],
}

impl Lcd {
    pub fn new(video: Box<dyn VideoSink + Send>, scheduler: &mut Scheduler) -> Self {
        let hblank_start_event = scheduler.register_handle();
        let hblank_end_event = scheduler.register_handle();
        scheduler.schedule(hblank_start_event, EventKind::HblankStart, HDRAW_CYCLES);

        Self {
            registers: Registers::default(),
            memory: LcdMemory::default(),
            video,
            hblank_start_event,
            hblank_end_event,
            win_line: [window::ALL_OPEN; LCD_WIDTH],
            bg_line: [[0; LCD_WIDTH]; 4],
            bitmap_line: [0; LCD_WIDTH],
            obj_line: [0; LCD_WIDTH],
            obj_priority: [NO_OBJ; LCD_WIDTH],
            obj_alpha: [false; LCD_WIDTH],
        }
    }

    // -- MMIO ---------------------------------------------------------------

    pub fn read_io(&self, address: u32) -> u8 {
        let backgrounds = &self.registers.backgrounds;
        match address {
            0x00 => self.registers.dispcnt.get_byte(0),
            0x01 => self.registers.dispcnt.get_byte(1),
            0x02 => self.registers.green_swap.get_byte(0),
            0x03 => self.registers.green_swap.get_byte(1),
            0x04 => self.registers.dispstat.get_byte(0),
            0x05 => self.registers.dispstat.get_byte(1),
            0x06 => self.registers.line,
            0x07 => 0,
            0x08..=0x0F => {
                let n = ((address - 0x08) / 2) as usize;
                backgrounds[n].read_control_byte((address & 1) as u8, n < 2)
            }
            0x48 => self.registers.winin.get_byte(0),
            0x49 => self.registers.winin.get_byte(1),
            0x4A => self.registers.winout.get_byte(0),
            0x4B => self.registers.winout.get_byte(1),
            0x50 => self.registers.bldcnt.get_byte(0),
            0x51 => self.registers.bldcnt.get_byte(1),
            0x52 => self.registers.bldalpha.get_byte(0),
            0x53 => self.registers.bldalpha.get_byte(1),
            // Everything else in the LCD block is write-only.
            _ => 0,
        }
    }

    pub fn write_io(&mut self, address: u32, value: u8) {
        let line = self.registers.line;
        let backgrounds = &mut self.registers.backgrounds;
        match address {
            0x00 => self.registers.dispcnt.set_byte(0, value),
            0x01 => self.registers.dispcnt.set_byte(1, value),
            0x02 => self.registers.green_swap.set_byte(0, value),
            0x03 => self.registers.green_swap.set_byte(1, value),
            // DISPSTAT bits 0-2 are hardware status, read-only.
            0x04 => self.registers.dispstat.set_byte(0, value & !0x07),
            0x05 => self.registers.dispstat.set_byte(1, value),
            0x06 | 0x07 => {} // VCOUNT is read-only
            0x08..=0x0F => {
                let n = ((address - 0x08) / 2) as usize;
                backgrounds[n].control.set_byte((address & 1) as u8, value);
            }
            0x10..=0x1F => {
                let n = ((address - 0x10) / 4) as usize;
                let offset = if address & 2 == 0 {
                    &mut backgrounds[n].h_offset
                } else {
                    &mut backgrounds[n].v_offset
                };
                if address & 1 == 0 {
                    offset.set_byte(0, value);
                } else {
                    offset.set_byte(1, value & 1);
                }
            }
            0x20..=0x3F => {
                let n = 2 + ((address - 0x20) / 16) as usize;
                let background = &mut backgrounds[n];
                match address & 0xF {
                    0x0 => background.param_a.set_byte(0, value),
                    0x1 => background.param_a.set_byte(1, value),
                    0x2 => background.param_b.set_byte(0, value),
                    0x3 => background.param_b.set_byte(1, value),
                    0x4 => background.param_c.set_byte(0, value),
                    0x5 => background.param_c.set_byte(1, value),
                    0x6 => background.param_d.set_byte(0, value),
                    0x7 => background.param_d.set_byte(1, value),
                    0x8..=0xB => {
                        background.reference_x.set_byte((address & 3) as u8, value);
                        background.last_scanline = line;
                    }
                    _ => {
                        background.reference_y.set_byte((address & 3) as u8, value);
                        background.last_scanline = line;
                    }
                }
            }
            0x40 => self.registers.winh[0].set_byte(0, value),
            0x41 => self.registers.winh[0].set_byte(1, value),
            0x42 => self.registers.winh[1].set_byte(0, value),
            0x43 => self.registers.winh[1].set_byte(1, value),
            0x44 => self.registers.winv[0].set_byte(0, value),
            0x45 => self.registers.winv[0].set_byte(1, value),
            0x46 => self.registers.winv[1].set_byte(0, value),
            0x47 => self.registers.winv[1].set_byte(1, value),
            0x48 => self.registers.winin.set_byte(0, value & 0x3F),
            0x49 => self.registers.winin.set_byte(1, value & 0x3F),
            0x4A => self.registers.winout.set_byte(0, value & 0x3F),
            0x4B => self.registers.winout.set_byte(1, value & 0x3F),
            0x4C => self.registers.mosaic.set_byte(0, value),
            0x4D => self.registers.mosaic.set_byte(1, value),
            0x50 => self.registers.bldcnt.set_byte(0, value),
            0x51 => self.registers.bldcnt.set_byte(1, value & 0x3F),
            0x52 => self.registers.bldalpha.set_byte(0, value & 0x1F),
            0x53 => self.registers.bldalpha.set_byte(1, value & 0x1F),
            0x54 => self.registers.bldy.set_byte(0, value),
            0x55 => self.registers.bldy.set_byte(1, value),
            _ => {}
        }
    }

    // -- Video memory -------------------------------------------------------

    /// Folds a 0x0600_0000-relative offset into the 96 KiB array: the
    /// region mirrors as 64K + 32K + 32K within each 128 KiB window.
    fn vram_index(address: u32) -> usize {
        let address = (address as usize) % 0x2_0000;
        if address >= 0x1_8000 {
            address - 0x8000
        } else {
            address
        }
    }

    pub fn vram_read(&self, address: u32) -> u8 {
        self.memory.video_ram[Self::vram_index(address)]
    }

    pub fn vram_write(&mut self, address: u32, value: u8) {
        self.memory.video_ram[Self::vram_index(address)] = value;
    }

    /// Byte writes to VRAM address the containing halfword and duplicate the
    /// byte into both lanes, but only inside the BG region (the boundary
    /// moves up in bitmap modes); byte writes to OBJ tiles are dropped.
    pub fn vram_write_byte(&mut self, address: u32, value: u8) {
        let index = Self::vram_index(address);
        let bg_end = if self.registers.bitmap_mode() { 0x1_4000 } else { 0x1_0000 };
        if index < bg_end {
            self.memory.video_ram[index & !1] = value;
            self.memory.video_ram[index | 1] = value;
        } else {
            tracing::trace!("OBJ VRAM byte write dropped ({address:08X})");
        }
    }

    pub fn palette_read(&self, address: u32) -> u8 {
        self.memory.palette_ram[address as usize % PALETTE_RAM_SIZE]
    }

    pub fn palette_write(&mut self, address: u32, value: u8) {
        self.memory.palette_ram[address as usize % PALETTE_RAM_SIZE] = value;
    }

    /// Byte writes to palette RAM write the byte to both lanes of the
    /// containing halfword.
    pub fn palette_write_byte(&mut self, address: u32, value: u8) {
        let index = address as usize % PALETTE_RAM_SIZE;
        self.memory.palette_ram[index & !1] = value;
        self.memory.palette_ram[index | 1] = value;
    }

    pub fn oam_read(&self, address: u32) -> u8 {
        self.memory.object_attributes[address as usize % OAM_SIZE]
    }

    pub fn oam_write(&mut self, address: u32, value: u8) {
        self.memory.object_attributes[address as usize % OAM_SIZE] = value;
    }

    // -- Events -------------------------------------------------------------

    pub fn hblank_start(&mut self, now: u64, late: u64, scheduler: &mut Scheduler) -> LcdEventOutput {
        let mut output = LcdEventOutput::default();

        self.registers.set_hblank_flag(true);
        output.request_hblank_irq = self.registers.hblank_irq_enabled();

        let line = self.registers.line;
        if u32::from(line) < LCD_HEIGHT as u32 {
            self.render_scanline(u32::from(line));
            output.notify_dma_hblank = true;
        }

        // Video-capture DMA runs on lines 2-161.
        output.notify_dma_video = (2..=161).contains(&line);

        scheduler.schedule_at(
            self.hblank_end_event,
            EventKind::HblankEnd,
            now - late + HBLANK_CYCLES,
        );

        output
    }

    pub fn hblank_end(&mut self, now: u64, late: u64, scheduler: &mut Scheduler) -> LcdEventOutput {
        let mut output = LcdEventOutput::default();

        self.registers.set_hblank_flag(false);
        self.registers.line += 1;

        if self.registers.line == TOTAL_LINES {
            self.registers.line = 0;
            // The affine reference points restart at the top of the frame.
            self.registers.backgrounds[2].last_scanline = 0;
            self.registers.backgrounds[3].last_scanline = 0;
        }

        match self.registers.line {
            160 => {
                self.registers.set_vblank_flag(true);
                self.video.present_frame();
                output.notify_dma_vblank = true;
                output.request_vblank_irq = self.registers.vblank_irq_enabled();
            }
            // The flag reads clear on the last line of vertical blank.
            227 => self.registers.set_vblank_flag(false),
            _ => {}
        }

        let vcount_match = self.registers.line == self.registers.vcount_setting();
        self.registers.set_vcount_flag(vcount_match);
        output.request_vcount_irq = vcount_match && self.registers.vcount_irq_enabled();

        scheduler.schedule_at(
            self.hblank_start_event,
            EventKind::HblankStart,
            now - late + HDRAW_CYCLES,
        );

        output
    }

    // -- Scanline composition ----------------------------------------------

    fn render_scanline(&mut self, y: u32) {
        if self.registers.forced_blank() {
            self.video.set_line(y as usize, &[expand_color(0x7FFF); LCD_WIDTH]);
            return;
        }

        self.bg_line = [[0; LCD_WIDTH]; 4];
        self.bitmap_line = [0; LCD_WIDTH];
        self.obj_line = [0; LCD_WIDTH];
        self.obj_priority = [NO_OBJ; LCD_WIDTH];
        self.obj_alpha = [false; LCD_WIDTH];

        self.compute_window_line(y);
        self.render_backgrounds(y);
        self.render_objects(y);
        self.composite_line(y);
    }

    fn render_backgrounds(&mut self, y: u32) {
        let registers = &self.registers;
        let vram = &self.memory.video_ram[..];
        let mode = registers.bg_mode();
        let (mosaic_x, mosaic_y) = registers.mosaic_bg();

        for x in 0..LCD_WIDTH as u32 {
            match mode {
                0 | 1 | 2 => {
                    for n in 0..4 {
                        if !registers.bg_enabled(n) {
                            continue;
                        }
                        let background = &registers.backgrounds[n];
                        let (mut sample_x, mut sample_y) = (x, y);
                        if background.mosaic() {
                            sample_x = x / u32::from(mosaic_x) * u32::from(mosaic_x);
                            sample_y = y / u32::from(mosaic_y) * u32::from(mosaic_y);
                        }
                        let text = mode == 0 || (mode == 1 && n < 2);
                        self.bg_line[n][x as usize] = if text {
                            background.text_pixel(sample_x, sample_y, vram)
                        } else {
                            background.affine_pixel(sample_x, sample_y, vram)
                        };
                    }
                }
                3 => {
                    if registers.bg_enabled(2) {
                        self.bitmap_line[x as usize] =
                            Background::bitmap_pixel_mode_3(x, y, vram);
                    }
                }
                4 => {
                    if registers.bg_enabled(2) {
                        self.bitmap_line[x as usize] = Background::bitmap_pixel_mode_4(
                            x,
                            y,
                            vram,
                            &self.memory.palette_ram,
                            registers.frame_select(),
                        );
                    }
                }
                5 => {
                    if registers.bg_enabled(2) {
                        self.bitmap_line[x as usize] =
                            Background::bitmap_pixel_mode_5(x, y, vram, registers.frame_select());
                    }
                }
                _ => {}
            }
        }
    }

    fn render_objects(&mut self, y: u32) {
        if !self.registers.obj_enabled() {
            return;
        }

        let (mosaic_x, mosaic_y) = self.registers.mosaic_obj();

        // Back to front so that lower OAM indices win priority ties.
        for i in (0..128).rev() {
            let object = ObjectAttributes::parse(&self.memory.object_attributes, i);
            if object.hidden || object.mode == GfxMode::Window || !object.covers_line(y as i32) {
                continue;
            }

            let mut local_y = y as i32 - object.y;
            if object.mosaic {
                local_y = local_y / i32::from(mosaic_y) * i32::from(mosaic_y);
            }

            for local_x in 0..object.box_width() {
                let screen_x = object.x + local_x;
                if !(0..LCD_WIDTH as i32).contains(&screen_x) {
                    continue;
                }
                if !self.win_line[screen_x as usize].get_bit(4) {
                    continue;
                }

                let mut local_x = local_x;
                if object.mosaic {
                    local_x = local_x / i32::from(mosaic_x) * i32::from(mosaic_x);
                }

                let palette_index = object.pixel(
                    local_x,
                    local_y,
                    &self.memory.video_ram,
                    &self.memory.object_attributes,
                    self.registers.obj_1d_mapping(),
                    self.registers.bitmap_mode(),
                );

                if palette_index != 0 && object.priority <= self.obj_priority[screen_x as usize] {
                    self.obj_line[screen_x as usize] = palette_index;
                    self.obj_priority[screen_x as usize] = object.priority;
                    self.obj_alpha[screen_x as usize] = object.mode == GfxMode::AlphaBlend;
                }
            }
        }
    }

    fn bg_color(&self, layer: usize, x: usize) -> u16 {
        if layer == 2 && self.registers.bitmap_mode() {
            return self.bitmap_line[x];
        }
        let index = usize::from(self.bg_line[layer][x]);
        u16::from_le_bytes([self.memory.palette_ram[index * 2], self.memory.palette_ram[index * 2 + 1]])
    }

    fn layer_color(&self, layer: usize, x: usize, backdrop: u16) -> u16 {
        match layer {
            0..=3 => self.bg_color(layer, x),
            4 => {
                let index = 0x100 + usize::from(self.obj_line[x]);
                u16::from_le_bytes([
                    self.memory.palette_ram[index * 2],
                    self.memory.palette_ram[index * 2 + 1],
                ])
            }
            _ => backdrop,
        }
    }

    fn composite_line(&mut self, y: u32) {
        let backdrop = u16::from_le_bytes([self.memory.palette_ram[0], self.memory.palette_ram[1]]);
        let bitmap = self.registers.bitmap_mode();
        let mut line = [0u32; LCD_WIDTH];

        for x in 0..LCD_WIDTH {
            let window = self.win_line[x];

            // One entry per layer: layer id in the high bits, effective
            // priority in the low three. Backgrounds store priority + 1 and
            // objects their raw priority, which gives the object layer the
            // edge over backgrounds of the same programmed priority.
            // Transparent layers sink to the bottom (6); the backdrop (5)
            // sits just above them.
            let mut entries = [0u8; 6];
            for (layer, entry) in entries.iter_mut().enumerate() {
                *entry = (layer as u8) << 3;
            }
            entries[4] |= if self.obj_line[x] != 0 && window.get_bit(4) {
                self.obj_priority[x]
            } else {
                NO_OBJ
            };
            for layer in 0..4 {
                let opaque = if layer == 2 && bitmap {
                    true
                } else {
                    self.bg_line[layer][x] != 0
                };
                entries[layer] |= if opaque && window.get_bit(layer as u8) {
                    self.registers.backgrounds[layer].priority() as u8 + 1
                } else {
                    NO_OBJ
                };
            }
            entries[5] |= 5;

            // Priority first; the layer id breaks the remaining ties (BGs
            // in numeric order).
            entries.sort_unstable_by_key(|e| ((e & 7) << 3) | (e >> 3));

            let top = usize::from(entries[0] >> 3);
            let mut color = self.layer_color(top, x, backdrop);

            // Color special effects, gated by the window's effect bit.
            let effects_allowed = window.get_bit(5);
            let obj_forces_blend = top == 4 && self.obj_alpha[x];
            if effects_allowed && (self.registers.blend_target_1(top) || obj_forces_blend) {
                let mode = if obj_forces_blend { 1 } else { self.registers.blend_mode() };
                match mode {
                    1 => {
                        let below = usize::from(entries[1] >> 3);
                        if self.registers.blend_target_2(below) {
                            let second = self.layer_color(below, x, backdrop);
                            let (eva, evb) = self.registers.blend_alpha();
                            color = alpha_blend(color, second, eva, evb);
                        }
                    }
                    2 => color = brightness_adjust(color, self.registers.blend_brightness(), true),
                    3 => color = brightness_adjust(color, self.registers.blend_brightness(), false),
                    _ => {}
                }
            }

            line[x] = expand_color(color);
        }

        self.video.set_line(y as usize, &line);
    }
}

/// result = (first * eva + second * evb) / 16, per channel, saturating.
fn alpha_blend(first: u16, second: u16, eva: u16, evb: u16) -> u16 {
    let mut blended = 0u16;
    for shift in [0, 5, 10] {
        let a = first >> shift & 0x1F;
        let b = second >> shift & 0x1F;
        let channel = ((a * eva + b * evb) / 16).min(31);
        blended |= channel << shift;
    }
    blended
}

/// Brightness increase (toward white) or decrease (toward black) by
/// `evy / 16`.
fn brightness_adjust(color: u16, evy: u16, increase: bool) -> u16 {
    let mut adjusted = 0u16;
    for shift in [0, 5, 10] {
        let channel = color >> shift & 0x1F;
        let result = if increase {
            channel + (31 - channel) * evy / 16
        } else {
            channel - channel * evy / 16
        };
        adjusted |= result.min(31) << shift;
    }
    adjusted
}

/// 15-bit BGR555 to 0xRRGGBBAA.
const fn expand_color(color: u16) -> u32 {
    let red = (color & 0x1F) as u32 * 8;
    let green = (color >> 5 & 0x1F) as u32 * 8;
    let blue = (color >> 10 & 0x1F) as u32 * 8;
    (red << 24) | (green << 16) | (blue << 8) | 0xFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CountingSink {
        lines: Arc<AtomicUsize>,
        frames: Arc<AtomicUsize>,
        last_line: Arc<Mutex<Vec<u32>>>,
    }

    impl VideoSink for CountingSink {
        fn set_pixel(&mut self, _x: usize, _y: usize, _color: u32) {}
        fn set_line(&mut self, _y: usize, colors: &[u32; 240]) {
            self.lines.fetch_add(1, Ordering::Relaxed);
            *self.last_line.lock().unwrap() = colors.to_vec();
        }
        fn present_frame(&mut self) {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn make() -> (Lcd, Scheduler, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<Mutex<Vec<u32>>>) {
        let mut scheduler = Scheduler::new();
        let sink = CountingSink::default();
        let lines = sink.lines.clone();
        let frames = sink.frames.clone();
        let last_line = sink.last_line.clone();
        let lcd = Lcd::new(Box::new(sink), &mut scheduler);
        (lcd, scheduler, lines, frames, last_line)
    }

    fn run_events(lcd: &mut Lcd, scheduler: &mut Scheduler, cycles: u64) -> Vec<LcdEventOutput> {
        let mut outputs = Vec::new();
        scheduler.advance(cycles);
        while let Some(event) = scheduler.pop_due() {
            let late = scheduler.now() - event.fire_at;
            let output = match event.kind {
                EventKind::HblankStart => lcd.hblank_start(scheduler.now(), late, scheduler),
                EventKind::HblankEnd => lcd.hblank_end(scheduler.now(), late, scheduler),
                _ => unreachable!(),
            };
            outputs.push(output);
        }
        outputs
    }

    #[test]
    fn a_frame_is_160_lines_and_one_present() {
        let (mut lcd, mut scheduler, lines, frames, _) = make();
        run_events(&mut lcd, &mut scheduler, 280_896);
        assert_eq!(lines.load(Ordering::Relaxed), 160);
        assert_eq!(frames.load(Ordering::Relaxed), 1);
        assert_eq!(lcd.registers.line, 0);
    }

    #[test]
    fn hblank_and_vblank_flags_follow_the_beam() {
        let (mut lcd, mut scheduler, ..) = make();

        run_events(&mut lcd, &mut scheduler, 960);
        assert!(lcd.registers.dispstat.get_bit(1));

        run_events(&mut lcd, &mut scheduler, 272);
        assert!(!lcd.registers.dispstat.get_bit(1));
        assert_eq!(lcd.registers.line, 1);
        assert!(!lcd.registers.dispstat.get_bit(0));

        // Up to line 160.
        run_events(&mut lcd, &mut scheduler, 1232 * 159);
        assert_eq!(lcd.registers.line, 160);
        assert!(lcd.registers.dispstat.get_bit(0));
    }

    #[test]
    fn vblank_irq_requested_once_per_frame() {
        let (mut lcd, mut scheduler, ..) = make();
        lcd.write_io(0x04, 0x08); // VBlank IRQ enable

        let outputs = run_events(&mut lcd, &mut scheduler, 280_896);
        let vblanks = outputs.iter().filter(|o| o.request_vblank_irq).count();
        assert_eq!(vblanks, 1);
        let hblank_dmas = outputs.iter().filter(|o| o.notify_dma_hblank).count();
        assert_eq!(hblank_dmas, 160);
    }

    #[test]
    fn vcount_match_fires_at_hblank_end_of_the_matching_line() {
        let (mut lcd, mut scheduler, ..) = make();
        lcd.write_io(0x05, 3); // VCount setting = 3
        lcd.write_io(0x04, 0x20); // VCount IRQ enable

        let outputs = run_events(&mut lcd, &mut scheduler, 1232 * 4);
        let matches = outputs.iter().filter(|o| o.request_vcount_irq).count();
        assert_eq!(matches, 1);
        assert!(lcd.registers.dispstat.get_bit(2));

        run_events(&mut lcd, &mut scheduler, 1232);
        assert!(!lcd.registers.dispstat.get_bit(2));
    }

    #[test]
    fn mode3_scanline_lands_in_the_sink() {
        let (mut lcd, mut scheduler, _, _, last_line) = make();
        lcd.write_io(0x00, 0x03); // mode 3
        lcd.write_io(0x01, 0x04); // BG2 enable

        // Pixel (0, 0) pure red (BGR555 0x001F).
        lcd.vram_write(0, 0x1F);
        lcd.vram_write(1, 0x00);

        run_events(&mut lcd, &mut scheduler, 960);
        let line = last_line.lock().unwrap();
        assert_eq!(line[0], 0xF8_00_00_FF);
        assert_eq!(line[1], 0x00_00_00_FF);
    }

    #[test]
    fn backdrop_fills_transparent_pixels() {
        let (mut lcd, mut scheduler, _, _, last_line) = make();
        // Mode 0, nothing enabled: backdrop only.
        lcd.palette_write_byte(0, 0x1F); // backdrop = red (both lanes)
        lcd.memory.palette_ram[1] = 0;

        run_events(&mut lcd, &mut scheduler, 960);
        assert_eq!(last_line.lock().unwrap()[0], 0xF8_00_00_FF);
    }

    #[test]
    fn palette_byte_writes_duplicate_into_the_halfword() {
        let (mut lcd, ..) = make();
        lcd.palette_write_byte(3, 0x7C);
        assert_eq!(lcd.memory.palette_ram[2], 0x7C);
        assert_eq!(lcd.memory.palette_ram[3], 0x7C);
    }

    #[test]
    fn vram_byte_writes_respect_the_obj_boundary() {
        let (mut lcd, ..) = make();
        lcd.vram_write_byte(0x5, 0xAA);
        assert_eq!(lcd.memory.video_ram[0x4], 0xAA);
        assert_eq!(lcd.memory.video_ram[0x5], 0xAA);

        // Tile modes: OBJ VRAM starts at 64K, byte writes dropped.
        lcd.vram_write_byte(0x1_2001, 0xBB);
        assert_eq!(lcd.memory.video_ram[0x1_2000], 0);
        assert_eq!(lcd.memory.video_ram[0x1_2001], 0);

        // Bitmap modes move the boundary to 80K.
        lcd.write_io(0x00, 0x03);
        lcd.vram_write_byte(0x1_2001, 0xBB);
        assert_eq!(lcd.memory.video_ram[0x1_2000], 0xBB);
    }

    #[test]
    fn vram_mirrors_the_top_32k() {
        let (mut lcd, ..) = make();
        lcd.vram_write(0x1_0000, 0x55);
        assert_eq!(lcd.vram_read(0x1_8000), 0x55);
        assert_eq!(lcd.vram_read(0x3_0000), 0x55);
    }

    #[test]
    fn reference_point_write_latches_the_current_line() {
        let (mut lcd, mut scheduler, ..) = make();
        run_events(&mut lcd, &mut scheduler, 1232 * 10);
        assert_eq!(lcd.registers.line, 10);

        lcd.write_io(0x28, 0x80);
        assert_eq!(lcd.registers.backgrounds[2].last_scanline, 10);
        // The latch resets at the top of the next frame.
        run_events(&mut lcd, &mut scheduler, 1232 * 218);
        assert_eq!(lcd.registers.backgrounds[2].last_scanline, 0);
    }

    #[test]
    fn window_masks_a_background_region() {
        let (mut lcd, mut scheduler, _, _, last_line) = make();
        // Mode 3 + BG2, window 0 covering x in 0..8, y in 0..160.
        lcd.write_io(0x00, 0x03);
        lcd.write_io(0x01, 0x24); // BG2 + win0 enable
        lcd.write_io(0x40, 8); // win0 right = 8
        lcd.write_io(0x41, 0); // win0 left = 0
        lcd.write_io(0x44, 160);
        lcd.write_io(0x45, 0);
        lcd.write_io(0x48, 0x00); // inside: nothing
        lcd.write_io(0x4A, 0x3F); // outside: everything

        for x in 0..16u32 {
            lcd.vram_write(x * 2, 0x1F);
        }

        run_events(&mut lcd, &mut scheduler, 960);
        let line = last_line.lock().unwrap();
        // Inside the window BG2 is off: backdrop (black).
        assert_eq!(line[0], 0x00_00_00_FF);
        // Outside it shows.
        assert_eq!(line[8], 0xF8_00_00_FF);
    }

    #[test]
    fn brightness_blend_applies_to_first_target() {
        let (mut lcd, mut scheduler, _, _, last_line) = make();
        lcd.write_io(0x00, 0x03);
        lcd.write_io(0x01, 0x04); // BG2
        lcd.write_io(0x50, 0x84); // first target BG2, brightness increase
        lcd.write_io(0x54, 16); // EVY = 16: full white

        lcd.vram_write(0, 0x1F);
        run_events(&mut lcd, &mut scheduler, 960);
        assert_eq!(last_line.lock().unwrap()[0], 0xF8_F8_F8_FF);
    }
}
