//! LCD register bag: DISPCNT/DISPSTAT/VCOUNT plus the window, mosaic and
//! blending registers. Background-specific registers live with the
//! backgrounds themselves.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

use super::background::Background;

#[derive(Default, Serialize, Deserialize)]
pub struct Registers {
    pub dispcnt: u16,
    pub green_swap: u16,
    pub dispstat: u16,
    /// VCOUNT: the current scanline, 0-227.
    pub line: u8,
    pub backgrounds: [Background; 4],
    /// WIN0H/WIN1H: left edge in the high byte, right edge in the low byte.
    pub winh: [u16; 2],
    /// WIN0V/WIN1V: top edge in the high byte, bottom edge in the low byte.
    pub winv: [u16; 2],
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,
}

impl Registers {
    pub fn bg_mode(&self) -> u16 {
        self.dispcnt.get_bits(0..=2)
    }

    pub fn bitmap_mode(&self) -> bool {
        self.bg_mode() >= 3
    }

    pub fn frame_select(&self) -> bool {
        self.dispcnt.get_bit(4)
    }

    pub fn obj_1d_mapping(&self) -> bool {
        self.dispcnt.get_bit(6)
    }

    pub fn forced_blank(&self) -> bool {
        self.dispcnt.get_bit(7)
    }

    pub fn bg_enabled(&self, n: usize) -> bool {
        let mode_allows = match self.bg_mode() {
            0 => true,
            1 => n != 3,
            2 => n >= 2,
            _ => n == 2,
        };
        mode_allows && self.dispcnt.get_bit(8 + n as u8)
    }

    pub fn obj_enabled(&self) -> bool {
        self.dispcnt.get_bit(12)
    }

    pub fn win0_enabled(&self) -> bool {
        self.dispcnt.get_bit(13)
    }

    pub fn win1_enabled(&self) -> bool {
        self.dispcnt.get_bit(14)
    }

    pub fn obj_window_enabled(&self) -> bool {
        self.dispcnt.get_bit(15)
    }

    pub fn any_window_enabled(&self) -> bool {
        self.dispcnt.get_bits(13..=15) != 0
    }

    pub fn set_vblank_flag(&mut self, value: bool) {
        self.dispstat.set_bit(0, value);
    }

    pub fn set_hblank_flag(&mut self, value: bool) {
        self.dispstat.set_bit(1, value);
    }

    pub fn set_vcount_flag(&mut self, value: bool) {
        self.dispstat.set_bit(2, value);
    }

    pub fn vblank_irq_enabled(&self) -> bool {
        self.dispstat.get_bit(3)
    }

    pub fn hblank_irq_enabled(&self) -> bool {
        self.dispstat.get_bit(4)
    }

    pub fn vcount_irq_enabled(&self) -> bool {
        self.dispstat.get_bit(5)
    }

    pub fn vcount_setting(&self) -> u8 {
        self.dispstat.get_byte(1)
    }

    pub fn blend_mode(&self) -> u16 {
        self.bldcnt.get_bits(6..=7)
    }

    /// Is `layer` (0-3 = BG, 4 = OBJ, 5 = backdrop) a first blend target?
    pub fn blend_target_1(&self, layer: usize) -> bool {
        self.bldcnt.get_bit(layer as u8)
    }

    pub fn blend_target_2(&self, layer: usize) -> bool {
        self.bldcnt.get_bit(8 + layer as u8)
    }

    /// EVA/EVB coefficients, each clamped to 16/16.
    pub fn blend_alpha(&self) -> (u16, u16) {
        (
            (self.bldalpha & 0x1F).min(16),
            (self.bldalpha >> 8 & 0x1F).min(16),
        )
    }

    pub fn blend_brightness(&self) -> u16 {
        (self.bldy & 0x1F).min(16)
    }

    pub fn mosaic_bg(&self) -> (u16, u16) {
        (self.mosaic.get_bits(0..=3) + 1, self.mosaic.get_bits(4..=7) + 1)
    }

    pub fn mosaic_obj(&self) -> (u16, u16) {
        (
            self.mosaic.get_bits(8..=11) + 1,
            self.mosaic.get_bits(12..=15) + 1,
        )
    }
}
