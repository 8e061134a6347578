//! Save media backings: SRAM, Flash and EEPROM.
//!
//! A tagged enum rather than trait objects; the set of media types is closed
//! and the bus dispatches on it directly. Every state machine treats an
//! unexpected byte as a protocol desync and falls back to its ready state
//! without touching the data.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveType {
    None,
    Sram32K,
    Flash64K,
    Flash128K,
    Eeprom512,
    Eeprom8K,
}

impl SaveType {
    #[must_use]
    pub const fn backing_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Sram32K => 0x8000,
            Self::Flash64K => 0x1_0000,
            Self::Flash128K => 0x2_0000,
            Self::Eeprom512 => 0x200,
            Self::Eeprom8K => 0x2000,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub enum SaveMedia {
    None,
    Sram(Sram),
    Flash(Flash),
    Eeprom(Eeprom),
}

impl SaveMedia {
    #[must_use]
    pub fn with_type(save_type: SaveType) -> Self {
        match save_type {
            SaveType::None => Self::None,
            SaveType::Sram32K => Self::Sram(Sram::new()),
            SaveType::Flash64K | SaveType::Flash128K => Self::Flash(Flash::new(save_type)),
            SaveType::Eeprom512 | SaveType::Eeprom8K => Self::Eeprom(Eeprom::new(save_type)),
        }
    }

    #[must_use]
    pub const fn save_type(&self) -> SaveType {
        match self {
            Self::None => SaveType::None,
            Self::Sram(_) => SaveType::Sram32K,
            Self::Flash(flash) => flash.save_type,
            Self::Eeprom(eeprom) => eeprom.save_type,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Sram(sram) => &sram.data,
            Self::Flash(flash) => &flash.data,
            Self::Eeprom(eeprom) => &eeprom.data,
        }
    }

    /// Restores a raw backing image. Ignored when the size doesn't match
    /// the media type.
    pub fn load(&mut self, image: &[u8]) {
        let expected = self.save_type().backing_size();
        if image.len() != expected {
            tracing::warn!(
                "save image size {} doesn't match media ({expected} bytes), ignored",
                image.len()
            );
            return;
        }
        match self {
            Self::None => {}
            Self::Sram(sram) => sram.data.copy_from_slice(image),
            Self::Flash(flash) => flash.data.copy_from_slice(image),
            Self::Eeprom(eeprom) => eeprom.data.copy_from_slice(image),
        }
    }

    /// Resets the command state machines, preserving the data.
    pub fn reset(&mut self) {
        match self {
            Self::None | Self::Sram(_) => {}
            Self::Flash(flash) => flash.reset(),
            Self::Eeprom(eeprom) => eeprom.reset(),
        }
    }
}

// -- SRAM -------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct Sram {
    data: Vec<u8>,
}

impl Sram {
    fn new() -> Self {
        Self {
            data: vec![0xFF; SaveType::Sram32K.backing_size()],
        }
    }

    #[must_use]
    pub fn read(&self, address: u32) -> u8 {
        self.data[(address & 0x7FFF) as usize]
    }

    pub fn write(&mut self, address: u32, value: u8) {
        self.data[(address & 0x7FFF) as usize] = value;
    }
}

// -- Flash ------------------------------------------------------------------

/// Manufacturer and device IDs reported in chip-ID mode.
const CHIP_IDS: [[u8; 2]; 2] = [
    [0x32, 0x1B], // Panasonic, 64 KiB
    [0x62, 0x13], // Sanyo, 128 KiB
];

mod flash_command {
    pub const ENTER_CHIP_ID: u8 = 0x90;
    pub const EXIT_CHIP_ID: u8 = 0xF0;
    pub const PREPARE_ERASE: u8 = 0x80;
    pub const ERASE_CHIP: u8 = 0x10;
    pub const ERASE_SECTOR: u8 = 0x30;
    pub const PREPARE_WRITE: u8 = 0xA0;
    pub const SET_BANK: u8 = 0xB0;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum FlashState {
    Ready,
    /// Saw AA @ 5555.
    Unlock1,
    /// Saw 55 @ 2AAA, the next 5555 write is a command.
    Command,
    /// The next write programs one byte.
    Write,
    /// The next write to address 0 selects the bank.
    Bank,
}

#[derive(Serialize, Deserialize)]
pub struct Flash {
    save_type: SaveType,
    data: Vec<u8>,
    state: FlashState,
    chip_id_mode: bool,
    bank_2: bool,
    erase_next: bool,
}

impl Flash {
    fn new(save_type: SaveType) -> Self {
        Self {
            save_type,
            data: vec![0xFF; save_type.backing_size()],
            state: FlashState::Ready,
            chip_id_mode: false,
            bank_2: false,
            erase_next: false,
        }
    }

    fn reset(&mut self) {
        self.state = FlashState::Ready;
        self.chip_id_mode = false;
        self.bank_2 = false;
        self.erase_next = false;
    }

    fn bank_offset(&self) -> usize {
        usize::from(self.bank_2) * 0x1_0000
    }

    #[must_use]
    pub fn read(&self, address: u32) -> u8 {
        let address = (address & 0xFFFF) as usize;

        if self.chip_id_mode && address <= 1 {
            return CHIP_IDS[usize::from(self.save_type == SaveType::Flash128K)][address];
        }

        self.data[self.bank_offset() + address]
    }

    /// Returns true when the write mutated the backing data.
    pub fn write(&mut self, address: u32, value: u8) -> bool {
        let address = address & 0xFFFF;

        match self.state {
            FlashState::Ready => {
                if address == 0x5555 && value == 0xAA {
                    self.state = FlashState::Unlock1;
                }
            }
            FlashState::Unlock1 => {
                self.state = if address == 0x2AAA && value == 0x55 {
                    FlashState::Command
                } else {
                    FlashState::Ready
                };
            }
            FlashState::Command => return self.command(address, value),
            FlashState::Write => {
                let offset = self.bank_offset() + address as usize;
                self.data[offset] = value;
                self.state = FlashState::Ready;
                return true;
            }
            FlashState::Bank => {
                if address == 0 {
                    self.bank_2 = value & 1 != 0 && self.save_type == SaveType::Flash128K;
                }
                self.state = FlashState::Ready;
            }
        }

        false
    }

    fn command(&mut self, address: u32, value: u8) -> bool {
        use flash_command as cmd;

        self.state = FlashState::Ready;

        // A pending erase accepts a sector erase at a sector base address.
        if self.erase_next && address & 0xFFF == 0 && value == cmd::ERASE_SECTOR {
            let start = self.bank_offset() + address as usize;
            self.data[start..start + 0x1000].fill(0xFF);
            self.erase_next = false;
            return true;
        }

        if address != 0x5555 {
            tracing::debug!("flash command {value:02X} at non-command address {address:04X}");
            return false;
        }

        if self.erase_next {
            if value == cmd::ERASE_CHIP {
                self.data.fill(0xFF);
                self.erase_next = false;
                return true;
            }
            self.erase_next = false;
            return false;
        }

        match value {
            cmd::ENTER_CHIP_ID => self.chip_id_mode = true,
            cmd::EXIT_CHIP_ID => self.chip_id_mode = false,
            cmd::PREPARE_WRITE => self.state = FlashState::Write,
            cmd::SET_BANK if self.save_type == SaveType::Flash128K => {
                self.state = FlashState::Bank;
            }
            cmd::PREPARE_ERASE => self.erase_next = true,
            _ => tracing::debug!("unknown flash command {value:02X}"),
        }

        false
    }
}

// -- EEPROM -----------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum EepromState {
    AcceptCommand,
    ReadAddress,
    WriteAddress,
    WriteData,
    ReadTerminator,
    WriteTerminator,
    ReadDummy,
    Read,
}

#[derive(Serialize, Deserialize)]
pub struct Eeprom {
    save_type: SaveType,
    data: Vec<u8>,
    state: EepromState,
    address: u16,
    serial_buffer: u64,
    buffer_size: u32,
    /// Address width on the serial bus: 6 bits (512 B part) or 14 (8 KiB).
    bus_size: u32,
}

impl Eeprom {
    fn new(save_type: SaveType) -> Self {
        Self {
            save_type,
            data: vec![0xFF; save_type.backing_size()],
            state: EepromState::AcceptCommand,
            address: 0,
            serial_buffer: 0,
            buffer_size: 0,
            bus_size: if save_type == SaveType::Eeprom512 { 6 } else { 14 },
        }
    }

    fn reset(&mut self) {
        self.state = EepromState::AcceptCommand;
        self.address = 0;
        self.serial_buffer = 0;
        self.buffer_size = 0;
    }

    /// One bit out of the serial stream. Idle and in-between states read 1;
    /// a read command emits four dummy zero bits then the 64 data bits of
    /// the addressed 8-byte block, MSB first.
    pub fn read(&mut self) -> u8 {
        match self.state {
            EepromState::ReadDummy => {
                self.buffer_size += 1;
                if self.buffer_size == 4 {
                    self.state = EepromState::Read;
                    self.buffer_size = 0;
                }
                0
            }
            EepromState::Read => {
                let byte = self.data[(self.address * 8 + (self.address_block())) as usize];
                let bit = byte >> (7 - self.buffer_size % 8) & 1;
                self.buffer_size += 1;
                if self.buffer_size == 64 {
                    self.state = EepromState::AcceptCommand;
                    self.buffer_size = 0;
                }
                bit
            }
            _ => 1,
        }
    }

    const fn address_block(&self) -> u16 {
        (self.buffer_size / 8) as u16
    }

    /// One bit into the serial stream. Returns true when a write command
    /// just committed its 8-byte block.
    pub fn write(&mut self, value: u16) -> bool {
        if matches!(self.state, EepromState::ReadDummy | EepromState::Read) {
            return false;
        }

        self.serial_buffer = (self.serial_buffer << 1) | u64::from(value & 1);
        self.buffer_size += 1;

        match self.state {
            EepromState::AcceptCommand => {
                if self.buffer_size == 2 {
                    match self.serial_buffer & 0b11 {
                        0b10 => self.state = EepromState::WriteAddress,
                        0b11 => self.state = EepromState::ReadAddress,
                        _ => self.state = EepromState::AcceptCommand,
                    }
                    self.clear_buffer();
                }
            }
            EepromState::ReadAddress | EepromState::WriteAddress => {
                if self.buffer_size == self.bus_size {
                    // Only 10 bits of the 14-bit address are decoded.
                    self.address = (self.serial_buffer & 0x3FF) as u16
                        % (self.save_type.backing_size() / 8) as u16;
                    self.state = if self.state == EepromState::ReadAddress {
                        EepromState::ReadTerminator
                    } else {
                        EepromState::WriteData
                    };
                    self.clear_buffer();
                }
            }
            EepromState::WriteData => {
                if self.buffer_size == 64 {
                    for i in 0..8 {
                        self.data[(self.address * 8 + i) as usize] =
                            (self.serial_buffer >> ((7 - i) * 8)) as u8;
                    }
                    self.state = EepromState::WriteTerminator;
                    self.clear_buffer();
                }
            }
            EepromState::ReadTerminator => {
                self.state = EepromState::ReadDummy;
                self.clear_buffer();
            }
            EepromState::WriteTerminator => {
                self.state = EepromState::AcceptCommand;
                self.clear_buffer();
                return true;
            }
            EepromState::ReadDummy | EepromState::Read => unreachable!(),
        }

        false
    }

    fn clear_buffer(&mut self) {
        self.serial_buffer = 0;
        self.buffer_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flash_unlock(flash: &mut Flash) {
        flash.write(0x5555, 0xAA);
        flash.write(0x2AAA, 0x55);
    }

    #[test]
    fn sram_masks_to_15_bits() {
        let mut sram = Sram::new();
        sram.write(0x12345, 0xAB);
        assert_eq!(sram.read(0x2345), 0xAB);
    }

    #[test]
    fn flash_chip_id_mode() {
        let mut flash = Flash::new(SaveType::Flash64K);
        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::ENTER_CHIP_ID);
        assert_eq!(flash.read(0), 0x32);
        assert_eq!(flash.read(1), 0x1B);

        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::EXIT_CHIP_ID);
        assert_eq!(flash.read(0), 0xFF);

        let mut large = Flash::new(SaveType::Flash128K);
        flash_unlock(&mut large);
        large.write(0x5555, flash_command::ENTER_CHIP_ID);
        assert_eq!(large.read(0), 0x62);
        assert_eq!(large.read(1), 0x13);
    }

    #[test]
    fn flash_byte_program() {
        let mut flash = Flash::new(SaveType::Flash64K);
        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::PREPARE_WRITE);
        assert!(flash.write(0x1234, 0x42));
        assert_eq!(flash.read(0x1234), 0x42);
    }

    #[test]
    fn flash_sector_erase() {
        let mut flash = Flash::new(SaveType::Flash64K);
        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::PREPARE_WRITE);
        flash.write(0x2000, 0x00);

        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::PREPARE_ERASE);
        flash_unlock(&mut flash);
        flash.write(0x2000, flash_command::ERASE_SECTOR);
        assert_eq!(flash.read(0x2000), 0xFF);
    }

    #[test]
    fn flash_bank_switch_reaches_the_second_64k() {
        let mut flash = Flash::new(SaveType::Flash128K);
        // Program distinct bytes at offset 0 of both banks.
        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::PREPARE_WRITE);
        flash.write(0x0000, 0x11);

        // AA@5555 -> 55@2AAA -> B0@5555 -> 01@0000: select bank 1.
        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::SET_BANK);
        flash.write(0x0000, 0x01);

        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::PREPARE_WRITE);
        flash.write(0x0000, 0x22);

        assert_eq!(flash.read(0), 0x22);
        assert_eq!(flash.data[0], 0x11);
        assert_eq!(flash.data[0x1_0000], 0x22);
    }

    #[test]
    fn flash_64k_ignores_bank_switching() {
        let mut flash = Flash::new(SaveType::Flash64K);
        flash_unlock(&mut flash);
        flash.write(0x5555, flash_command::SET_BANK);
        flash.write(0x0000, 0x01);
        assert!(!flash.bank_2);
    }

    #[test]
    fn flash_desync_resets_to_ready() {
        let mut flash = Flash::new(SaveType::Flash64K);
        flash.write(0x5555, 0xAA);
        flash.write(0x1111, 0x99); // not the unlock continuation
        assert_eq!(flash.state, FlashState::Ready);
    }

    fn eeprom_write_block(eeprom: &mut Eeprom, address: u16, block: [u8; 8]) {
        // Command 0b10.
        eeprom.write(1);
        eeprom.write(0);
        for i in (0..14).rev() {
            eeprom.write(address >> i & 1);
        }
        for byte in block {
            for i in (0..8).rev() {
                eeprom.write(u16::from(byte) >> i & 1);
            }
        }
        assert!(eeprom.write(0)); // terminator commits
    }

    fn eeprom_read_block(eeprom: &mut Eeprom, address: u16) -> [u8; 8] {
        // Command 0b11.
        eeprom.write(1);
        eeprom.write(1);
        for i in (0..14).rev() {
            eeprom.write(address >> i & 1);
        }
        eeprom.write(0); // terminator

        for _ in 0..4 {
            assert_eq!(eeprom.read(), 0);
        }
        let mut block = [0u8; 8];
        for byte in &mut block {
            for _ in 0..8 {
                *byte = (*byte << 1) | eeprom.read();
            }
        }
        block
    }

    #[test]
    fn eeprom_round_trips_a_block() {
        let mut eeprom = Eeprom::new(SaveType::Eeprom8K);
        let block = [1, 2, 3, 4, 5, 6, 7, 8];
        eeprom_write_block(&mut eeprom, 0x003, block);
        assert_eq!(eeprom_read_block(&mut eeprom, 0x003), block);
        // Other blocks untouched.
        assert_eq!(eeprom_read_block(&mut eeprom, 0x004), [0xFF; 8]);
    }

    #[test]
    fn eeprom_idle_reads_are_high() {
        let mut eeprom = Eeprom::new(SaveType::Eeprom8K);
        assert_eq!(eeprom.read(), 1);
    }

    #[test]
    fn media_reset_preserves_data() {
        let mut media = SaveMedia::with_type(SaveType::Flash64K);
        if let SaveMedia::Flash(flash) = &mut media {
            flash_unlock(flash);
            flash.write(0x5555, flash_command::PREPARE_WRITE);
            flash.write(0, 0x42);
        }
        media.reset();
        assert_eq!(media.data()[0], 0x42);
    }
}
