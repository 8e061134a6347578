//! Game Pak: the ROM view, WAITCNT-derived access timing, and the save
//! media mapped into the upper regions.
//!
//! | Region      | Contents                                   |
//! |-------------|--------------------------------------------|
//! | `0x08-0x09` | ROM, waitstate 0                           |
//! | `0x0A-0x0B` | ROM mirror, waitstate 1                    |
//! | `0x0C-0x0D` | ROM mirror, waitstate 2 (0x0D: EEPROM)     |
//! | `0x0E-0x0F` | SRAM / Flash (8-bit bus)                   |

pub mod save;

use crate::bitwise::Bits;
use crate::cartridge_header::{CartridgeError, CartridgeHeader};
use crate::interface::SaveSink;

use save::{SaveMedia, SaveType};

/// First/second access cycles for {4,3,2,8}-style WAITCNT fields.
const WAIT_FIRST: [u64; 4] = [4, 3, 2, 8];
const WS0_SECOND: [u64; 2] = [2, 1];
const WS1_SECOND: [u64; 2] = [4, 1];
const WS2_SECOND: [u64; 2] = [8, 1];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    NonSequential,
    Sequential,
}

pub struct Cartridge {
    rom: Vec<u8>,
    pub header: CartridgeHeader,
    pub save: SaveMedia,
    save_sink: Option<Box<dyn SaveSink + Send>>,

    // Cycle counts derived from WAITCNT: per waitstate region, [first,
    // second] access.
    rom_waits: [[u64; 2]; 3],
    sram_wait: u64,
}

impl Cartridge {
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        if rom.is_empty() {
            return Err(CartridgeError::TooSmall(0));
        }
        if rom.len() > 0x200_0000 {
            return Err(CartridgeError::TooLarge(rom.len()));
        }

        let header = CartridgeHeader::new(&rom)?;
        let save_type = detect_save_type(&rom);
        tracing::info!(
            "loaded \"{}\" ({}), save type {save_type:?}",
            header.game_title,
            header.game_code
        );

        let mut cartridge = Self {
            rom,
            header,
            save: SaveMedia::with_type(save_type),
            save_sink: None,
            rom_waits: [[0; 2]; 3],
            sram_wait: 0,
        };
        cartridge.update_waitstates(0);
        Ok(cartridge)
    }

    pub fn set_save_sink(&mut self, sink: Box<dyn SaveSink + Send>) {
        self.save_sink = Some(sink);
    }

    pub fn load_save(&mut self, image: &[u8]) {
        self.save.load(image);
    }

    #[must_use]
    pub fn rom_size(&self) -> usize {
        self.rom.len()
    }

    /// Recomputes the per-region access cycles from a WAITCNT write.
    pub fn update_waitstates(&mut self, waitcnt: u16) {
        self.sram_wait = WAIT_FIRST[(waitcnt & 0b11) as usize];
        self.rom_waits[0] = [
            WAIT_FIRST[waitcnt.get_bits(2..=3) as usize],
            WS0_SECOND[usize::from(waitcnt.get_bit(4))],
        ];
        self.rom_waits[1] = [
            WAIT_FIRST[waitcnt.get_bits(5..=6) as usize],
            WS1_SECOND[usize::from(waitcnt.get_bit(7))],
        ];
        self.rom_waits[2] = [
            WAIT_FIRST[waitcnt.get_bits(8..=9) as usize],
            WS2_SECOND[usize::from(waitcnt.get_bit(10))],
        ];
    }

    /// Wait cycles (on top of the base cycle) for one access of `size`
    /// bytes at `address`. A 32-bit ROM access is two 16-bit accesses on
    /// the cartridge bus: the first at the requested kind, the second
    /// sequential.
    #[must_use]
    pub fn access_cycles(&self, address: u32, size: u32, access: Access) -> u64 {
        match address >> 24 {
            0x8 | 0x9 => self.rom_region_cycles(0, size, access),
            0xA | 0xB => self.rom_region_cycles(1, size, access),
            0xC | 0xD => self.rom_region_cycles(2, size, access),
            _ => self.sram_wait,
        }
    }

    fn rom_region_cycles(&self, region: usize, size: u32, access: Access) -> u64 {
        let [first, second] = self.rom_waits[region];
        let head = if access == Access::Sequential { second } else { first };
        if size == 4 { head + second } else { head }
    }

    #[must_use]
    pub fn eeprom_attached(&self) -> bool {
        matches!(
            self.save.save_type(),
            SaveType::Eeprom512 | SaveType::Eeprom8K
        )
    }

    /// Reads a `size`-byte value out of the cartridge space.
    pub fn read(&mut self, address: u32, size: u32) -> u32 {
        match address >> 24 {
            // The EEPROM serial line answers halfword accesses only.
            0xD if self.eeprom_attached() && size == 2 => {
                if let SaveMedia::Eeprom(eeprom) = &mut self.save {
                    return u32::from(eeprom.read());
                }
                unreachable!()
            }
            0xE | 0xF => {
                let byte = match &self.save {
                    SaveMedia::Sram(sram) => sram.read(address),
                    SaveMedia::Flash(flash) => flash.read(address),
                    _ => {
                        tracing::debug!("cart RAM read without save media at {address:08X}");
                        0xFF
                    }
                };
                // 8-bit bus: wider accesses see the byte on every lane.
                u32::from(byte) * 0x0101_0101 & (!0u32 >> (32 - size * 8))
            }
            _ => {
                let offset = (address & 0x01FF_FFFF) as usize;
                let mut value = 0u32;
                for i in 0..size as usize {
                    value |= u32::from(self.rom_byte(offset + i)) << (i * 8);
                }
                value
            }
        }
    }

    /// Out-of-bounds gamepak reads return the address bus noise: the low
    /// halfword of (address / 2), byte lane selected by the address.
    fn rom_byte(&self, offset: usize) -> u8 {
        self.rom.get(offset).copied().unwrap_or_else(|| {
            let halfword = (offset as u32 / 2) & 0xFFFF;
            halfword.get_byte((offset & 1) as u8)
        })
    }

    pub fn write(&mut self, address: u32, value: u32, size: u32) {
        match address >> 24 {
            0xD if self.eeprom_attached() && size == 2 => {
                if let SaveMedia::Eeprom(eeprom) = &mut self.save {
                    if eeprom.write(value as u16) {
                        self.persist();
                    }
                }
            }
            0xE | 0xF => {
                // The 8-bit bus sees the lane matching the address.
                let byte = (value >> ((address & (size - 1)) * 8)) as u8;
                let dirty = match &mut self.save {
                    SaveMedia::Sram(sram) => {
                        sram.write(address, byte);
                        true
                    }
                    SaveMedia::Flash(flash) => flash.write(address & 0xFFFF, byte),
                    _ => {
                        tracing::debug!("cart RAM write without save media at {address:08X}");
                        false
                    }
                };
                if dirty {
                    self.persist();
                }
            }
            _ => {
                // ROM is read-only; writes are dropped.
            }
        }
    }

    fn persist(&mut self) {
        if let Some(sink) = &mut self.save_sink {
            sink.persist(self.save.data());
        }
    }
}

/// Scans the ROM for the save-library ID strings the SDK embeds. The
/// specific flash variants take precedence over the generic `FLASH_V`.
fn detect_save_type(rom: &[u8]) -> SaveType {
    // The ID strings are word-aligned in the ROM image.
    let contains = |needle: &[u8]| {
        rom.len() >= needle.len() && rom.windows(needle.len()).step_by(4).any(|w| w == needle)
    };

    if contains(b"EEPROM_V") {
        SaveType::Eeprom8K
    } else if contains(b"FLASH1M_V") {
        SaveType::Flash128K
    } else if contains(b"FLASH_V") || contains(b"FLASH512_V") {
        SaveType::Flash64K
    } else if contains(b"SRAM_V") {
        SaveType::Sram32K
    } else {
        SaveType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rom_with(id: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x1000];
        rom[0xB2] = 0x96;
        rom[0x200..0x200 + id.len()].copy_from_slice(id);
        rom
    }

    #[test]
    fn save_type_detection_by_id_string() {
        assert_eq!(detect_save_type(&rom_with(b"EEPROM_V111")), SaveType::Eeprom8K);
        assert_eq!(detect_save_type(&rom_with(b"SRAM_V110")), SaveType::Sram32K);
        assert_eq!(detect_save_type(&rom_with(b"FLASH_V120")), SaveType::Flash64K);
        assert_eq!(detect_save_type(&rom_with(b"FLASH1M_V102")), SaveType::Flash128K);
        assert_eq!(detect_save_type(&rom_with(b"nothing here")), SaveType::None);
    }

    #[test]
    fn rom_reads_compose_little_endian() {
        let mut rom = rom_with(b"");
        rom[0..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let mut cartridge = Cartridge::new(rom).unwrap();
        assert_eq!(cartridge.read(0x0800_0000, 4), 0x4433_2211);
        assert_eq!(cartridge.read(0x0800_0002, 2), 0x4433);
        assert_eq!(cartridge.read(0x0800_0001, 1), 0x22);
        // Mirrors in the other waitstate windows.
        assert_eq!(cartridge.read(0x0A00_0000, 4), 0x4433_2211);
    }

    #[test]
    fn out_of_bounds_rom_reads_return_address_noise() {
        let mut cartridge = Cartridge::new(rom_with(b"")).unwrap();
        // Halfword at offset 0x2000 -> (0x2000 / 2) = 0x1000.
        assert_eq!(cartridge.read(0x0800_2000, 2), 0x1000);
        assert_eq!(cartridge.read(0x0800_2002, 2), 0x1001);
    }

    #[test]
    fn rom_writes_are_dropped() {
        let mut cartridge = Cartridge::new(rom_with(b"")).unwrap();
        cartridge.write(0x0800_0000, 0xDEAD_BEEF, 4);
        assert_eq!(cartridge.read(0x0800_0000, 4), 0);
    }

    #[test]
    fn sram_byte_lane_selection() {
        let mut cartridge = Cartridge::new(rom_with(b"SRAM_V110")).unwrap();
        // A halfword write at an odd-lane address stores that lane's byte.
        cartridge.write(0x0E00_0001, 0xBBAA, 2);
        assert_eq!(cartridge.read(0x0E00_0001, 1), 0xBB);
        // Wider reads mirror the byte across lanes.
        assert_eq!(cartridge.read(0x0E00_0001, 2), 0xBBBB);
    }

    #[test]
    fn default_waitstates_match_the_hardware_reset() {
        let cartridge = Cartridge::new(rom_with(b"")).unwrap();
        // WAITCNT = 0: WS0 4/2, SRAM 4.
        assert_eq!(cartridge.access_cycles(0x0800_0000, 2, Access::NonSequential), 4);
        assert_eq!(cartridge.access_cycles(0x0800_0000, 2, Access::Sequential), 2);
        assert_eq!(cartridge.access_cycles(0x0800_0000, 4, Access::NonSequential), 6);
        assert_eq!(cartridge.access_cycles(0x0E00_0000, 1, Access::NonSequential), 4);
    }

    #[test]
    fn waitcnt_reprograms_the_tables() {
        let mut cartridge = Cartridge::new(rom_with(b"")).unwrap();
        // WS0 3/1, SRAM 8.
        cartridge.update_waitstates(0b0001_0111);
        assert_eq!(cartridge.access_cycles(0x0800_0000, 2, Access::NonSequential), 3);
        assert_eq!(cartridge.access_cycles(0x0800_0000, 2, Access::Sequential), 1);
        assert_eq!(cartridge.access_cycles(0x0800_0000, 4, Access::NonSequential), 4);
        assert_eq!(cartridge.access_cycles(0x0E00_0000, 1, Access::NonSequential), 8);
    }

    #[test]
    fn eeprom_is_reachable_through_the_0x0d_window() {
        let mut cartridge = Cartridge::new(rom_with(b"EEPROM_V111")).unwrap();
        assert!(cartridge.eeprom_attached());
        // Idle serial line reads high.
        assert_eq!(cartridge.read(0x0D00_0000, 2), 1);
        // Byte-sized accesses never reach the EEPROM.
        let _ = cartridge.read(0x0D00_0000, 1);
    }
}
