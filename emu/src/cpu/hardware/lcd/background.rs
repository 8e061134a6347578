//! Background pixel fetch: text (tiled), affine and the three bitmap modes.
//!
//! All fetch functions return palette indices (or raw 15-bit colors for the
//! direct-color bitmap modes); composition happens in the scanline pass.
//! Affine arithmetic is integer-only: the reference points are 20.8
//! fixed-point, the matrix parameters 8.8.

use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, sign_extend};

#[derive(Default, Serialize, Deserialize)]
pub struct Background {
    /// BGxCNT.
    pub control: u16,
    pub h_offset: u16,
    pub v_offset: u16,

    // Rotation/scaling state (BG2/BG3 only).
    pub param_a: u16,
    pub param_b: u16,
    pub param_c: u16,
    pub param_d: u16,
    pub reference_x: u32,
    pub reference_y: u32,
    /// Scanline latched by the last reference-point write; the per-line
    /// affine step restarts from there.
    pub last_scanline: u8,
}

impl Background {
    pub fn priority(&self) -> u16 {
        self.control & 0b11
    }

    fn char_base_block(&self) -> u32 {
        u32::from(self.control.get_bits(2..=3))
    }

    fn color_256(&self) -> bool {
        self.control.get_bit(7)
    }

    fn screen_base_block(&self) -> u32 {
        u32::from(self.control.get_bits(8..=12))
    }

    fn wraparound(&self) -> bool {
        self.control.get_bit(13)
    }

    fn screen_size(&self) -> u16 {
        self.control.get_bits(14..=15)
    }

    pub fn mosaic(&self) -> bool {
        self.control.get_bit(6)
    }

    /// Regular BGs have no display-overflow bit; it reads back clear.
    pub fn read_control_byte(&self, byte_nth: u8, regular: bool) -> u8 {
        let byte = self.control.get_byte(byte_nth);
        if byte_nth == 1 && regular { byte & !0x20 } else { byte }
    }

    /// Text-mode fetch. Returns the final palette index (0 = transparent);
    /// 16-color tiles are already offset by their palette bank.
    pub fn text_pixel(&self, x: u32, y: u32, vram: &[u8]) -> u8 {
        let map_width = 32 << (self.screen_size() & 1);
        let map_height = 32 << (self.screen_size() >> 1);
        let tile_width: u32 = if self.color_256() { 8 } else { 4 };

        let x = (x + u32::from(self.h_offset)) % (map_width * 8);
        let y = (y + u32::from(self.v_offset)) % (map_height * 8);

        let tile_x = x / 8;
        let tile_y = y / 8;
        let screen_block = (tile_x / 32) + (tile_y / 32) * (map_width / 32);

        let tile_index = screen_block * 1024 + (tile_x % 32) + (tile_y % 32) * 32;
        let map_data_address = (0x800 * self.screen_base_block() + tile_index * 2) as usize;
        let tile_entry =
            u16::from_le_bytes([vram[map_data_address], vram[map_data_address + 1]]);
        let mirror_x = tile_entry.get_bit(10);
        let mirror_y = tile_entry.get_bit(11);

        let mut tile_pixel_x = x % 8;
        let mut tile_pixel_y = y % 8;
        if mirror_x {
            tile_pixel_x = 7 - tile_pixel_x;
        }
        if mirror_y {
            tile_pixel_y = 7 - tile_pixel_y;
        }
        if !self.color_256() {
            tile_pixel_x >>= 1;
        }

        let char_data_address = 0x4000 * self.char_base_block()
            + u32::from(tile_entry & 0x3FF) * tile_width * 8
            + tile_pixel_x
            + tile_pixel_y * tile_width;
        let mut palette_index = vram[char_data_address as usize];

        if !self.color_256() {
            let odd = (x & 1 != 0) ^ mirror_x;
            palette_index = (palette_index >> (u8::from(odd) * 4)) & 0xF;

            if palette_index == 0 {
                return 0;
            }
            palette_index += tile_entry.get_bits(12..=15) as u8 * 16;
        }

        palette_index
    }

    /// Affine fetch: always 256-color, one-byte map entries. Returns the
    /// palette index, 0 when the point falls outside a non-wrapping map.
    pub fn affine_pixel(&self, x: u32, y: u32, vram: &[u8]) -> u8 {
        // 20.8 fixed-point reference, stepped by whole lines since the last
        // reference write.
        let reference_x = sign_extend(self.reference_x, 28) as i32;
        let reference_y = sign_extend(self.reference_y, 28) as i32;
        let a = self.param_a as i16 as i32;
        let b = self.param_b as i16 as i32;
        let c = self.param_c as i16 as i32;
        let d = self.param_d as i16 as i32;

        let line = y as i32 - i32::from(self.last_scanline);
        let map_size = 16 << self.screen_size(); // in tiles
        let pixels = map_size * 8;

        let mut x2 = (a * x as i32 + b * line + reference_x) >> 8;
        let mut y2 = (c * x as i32 + d * line + reference_y) >> 8;

        if x2 < 0 || x2 >= pixels || y2 < 0 || y2 >= pixels {
            if self.wraparound() {
                x2 = x2.rem_euclid(pixels);
                y2 = y2.rem_euclid(pixels);
            } else {
                return 0;
            }
        }

        let tile_index = (x2 / 8 + (y2 / 8) * map_size) as u32;
        let tile_entry = vram[(0x800 * self.screen_base_block() + tile_index) as usize];
        let char_data_address = 0x4000 * self.char_base_block()
            + u32::from(tile_entry) * 64
            + (x2 % 8) as u32
            + (y2 % 8) as u32 * 8;

        vram[char_data_address as usize]
    }

    /// Mode 3: one 240x160 frame of raw 15-bit color.
    pub fn bitmap_pixel_mode_3(x: u32, y: u32, vram: &[u8]) -> u16 {
        let index = ((x + y * 240) * 2) as usize;
        u16::from_le_bytes([vram[index], vram[index + 1]])
    }

    /// Mode 4: two paletted 240x160 frames.
    pub fn bitmap_pixel_mode_4(x: u32, y: u32, vram: &[u8], palette: &[u8], frame_1: bool) -> u16 {
        let data_start: usize = if frame_1 { 0xA000 } else { 0 };
        let color_index = usize::from(vram[data_start + (x + y * 240) as usize]);
        u16::from_le_bytes([palette[color_index * 2], palette[color_index * 2 + 1]])
    }

    /// Mode 5: two 160x128 frames of raw 15-bit color.
    pub fn bitmap_pixel_mode_5(x: u32, y: u32, vram: &[u8], frame_1: bool) -> u16 {
        if x >= 160 || y >= 128 {
            return 0;
        }
        let data_start: usize = if frame_1 { 0xA000 } else { 0 };
        let index = data_start + ((x + y * 160) * 2) as usize;
        u16::from_le_bytes([vram[index], vram[index + 1]])
    }
}
