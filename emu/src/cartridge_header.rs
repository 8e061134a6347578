//! Cartridge header parsing.
//!
//! The first 192 bytes of every ROM: entry branch, compressed logo bitmap,
//! title/code/maker identification and an 8-bit complement checksum over
//! bytes 0xA0-0xBC.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum CartridgeError {
    TooSmall(usize),
    TooLarge(usize),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall(size) => write!(f, "ROM image too small: {size} bytes"),
            Self::TooLarge(size) => write!(f, "ROM image too large: {size} bytes (max 32 MiB)"),
        }
    }
}

impl std::error::Error for CartridgeError {}

pub struct CartridgeHeader {
    /// 32-bit ARM branch opcode, e.g. "B rom_start".
    pub rom_entry_point: [u8; 4],
    /// Compressed bitmap, required by the BIOS boot check.
    pub nintendo_logo: [u8; 156],
    /// Uppercase ascii, max 12 characters.
    pub game_title: String,
    /// Uppercase ascii, 4 characters.
    pub game_code: String,
    /// Uppercase ascii, 2 characters.
    pub maker_code: String,
    /// Must be 0x96.
    pub fixed_value: u8,
    /// 0x00 for current GBA models.
    pub main_unit_code: u8,
    /// Usually 0x00 (bit 7 = DACS/debug related).
    pub device_type: u8,
    /// Header checksum over 0xA0-0xBC.
    pub complement_check: u8,
    pub software_version: u8,
}

impl CartridgeHeader {
    pub fn new(data: &[u8]) -> Result<Self, CartridgeError> {
        if data.len() < 0xC0 {
            return Err(CartridgeError::TooSmall(data.len()));
        }

        let header = Self {
            rom_entry_point: data[0x000..=0x003].try_into().unwrap(),
            nintendo_logo: data[0x004..=0x09F].try_into().unwrap(),
            game_title: ascii_field(&data[0x0A0..=0x0AB]),
            game_code: ascii_field(&data[0x0AC..=0x0AF]),
            maker_code: ascii_field(&data[0x0B0..=0x0B1]),
            fixed_value: data[0x0B2],
            main_unit_code: data[0x0B3],
            device_type: data[0x0B4],
            software_version: data[0x0BC],
            complement_check: data[0x0BD],
        };

        let checksum = Self::compute_checksum(data);
        if checksum != header.complement_check {
            tracing::warn!(
                "header checksum mismatch: computed {checksum:#04X}, stored {:#04X}",
                header.complement_check
            );
        }

        Ok(header)
    }

    /// chk = -(sum of bytes A0h-BCh) - 0x19, truncated to 8 bits.
    fn compute_checksum(data: &[u8]) -> u8 {
        let sum = data[0xA0..=0xBC]
            .iter()
            .fold(0u8, |acc, &byte| acc.wrapping_add(byte));
        0u8.wrapping_sub(sum).wrapping_sub(0x19)
    }
}

/// Trims trailing NULs and replaces non-ascii bytes.
fn ascii_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rom_with_header() -> Vec<u8> {
        let mut rom = vec![0u8; 0xC0];
        rom[0xA0..0xA0 + 9].copy_from_slice(b"METROID4E");
        rom[0xAC..0xB0].copy_from_slice(b"AMTE");
        rom[0xB0..0xB2].copy_from_slice(b"01");
        rom[0xB2] = 0x96;
        let sum = rom[0xA0..=0xBC]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        rom[0xBD] = 0u8.wrapping_sub(sum).wrapping_sub(0x19);
        rom
    }

    #[test]
    fn parses_identification_fields() {
        let rom = rom_with_header();
        let header = CartridgeHeader::new(&rom).unwrap();
        assert_eq!(header.game_title, "METROID4E");
        assert_eq!(header.game_code, "AMTE");
        assert_eq!(header.maker_code, "01");
        assert_eq!(header.fixed_value, 0x96);
    }

    #[test]
    fn rejects_images_without_a_full_header() {
        assert!(matches!(
            CartridgeHeader::new(&[0u8; 16]),
            Err(CartridgeError::TooSmall(16))
        ));
    }

    #[test]
    fn checksum_matches_the_formula() {
        let rom = rom_with_header();
        let header = CartridgeHeader::new(&rom).unwrap();
        assert_eq!(
            CartridgeHeader::compute_checksum(&rom),
            header.complement_check
        );
    }
}
