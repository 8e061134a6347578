//! Per-scanline window mask.
//!
//! Each pixel of a line gets a 6-bit enable mask (BG0-BG3, OBJ, color
//! effects). Precedence from lowest to highest: object window, window 1,
//! window 0; pixels claimed by no window use WINOUT's low bits, and when no
//! window is enabled at all everything is open.

use crate::bitwise::Bits;

use super::Lcd;
use super::object::{GfxMode, ObjectAttributes};

pub const ALL_OPEN: u8 = 0x3F;

impl Lcd {
    /// True when `x` falls inside window `w` horizontally. Edges wrap: a
    /// left edge greater than the right edge opens the window across the
    /// screen seam.
    fn inside_window_h(&self, w: usize, x: u32) -> bool {
        let left = u32::from(self.registers.winh[w] >> 8);
        let right = u32::from(self.registers.winh[w] & 0xFF);
        if left > right {
            !(x < left && x >= right)
        } else {
            left <= x && x < right
        }
    }

    fn inside_window_v(&self, w: usize, y: u32) -> bool {
        let top = u32::from(self.registers.winv[w] >> 8);
        let bottom = u32::from(self.registers.winv[w] & 0xFF);
        if top > bottom {
            !(y < top && y >= bottom)
        } else {
            top <= y && y < bottom
        }
    }

    pub(super) fn compute_window_line(&mut self, y: u32) {
        if !self.registers.any_window_enabled() {
            self.win_line = [ALL_OPEN; 240];
            return;
        }

        // Window-mode objects on this line, rendered into a coverage mask.
        let mut obj_window = [false; 240];
        if self.registers.obj_window_enabled() {
            for i in 0..128 {
                let object = ObjectAttributes::parse(&self.memory.object_attributes, i);
                if object.hidden
                    || object.mode != GfxMode::Window
                    || !object.covers_line(y as i32)
                {
                    continue;
                }

                let local_y = y as i32 - object.y;
                for local_x in 0..object.box_width() {
                    let screen_x = object.x + local_x;
                    if !(0..240).contains(&screen_x) {
                        continue;
                    }
                    if object.pixel(
                        local_x,
                        local_y,
                        &self.memory.video_ram,
                        &self.memory.object_attributes,
                        self.registers.obj_1d_mapping(),
                        self.registers.bitmap_mode(),
                    ) != 0
                    {
                        obj_window[screen_x as usize] = true;
                    }
                }
            }
        }

        let winout = self.registers.winout.get_bits(0..=5) as u8;
        let obj_win_mask = self.registers.winout.get_bits(8..=13) as u8;
        let win0 = self.registers.winin.get_bits(0..=5) as u8;
        let win1 = self.registers.winin.get_bits(8..=13) as u8;

        for x in 0..240u32 {
            let mask = if self.registers.win0_enabled()
                && self.inside_window_h(0, x)
                && self.inside_window_v(0, y)
            {
                win0
            } else if self.registers.win1_enabled()
                && self.inside_window_h(1, x)
                && self.inside_window_v(1, y)
            {
                win1
            } else if obj_window[x as usize] {
                obj_win_mask
            } else {
                winout
            };
            self.win_line[x as usize] = mask;
        }
    }
}
