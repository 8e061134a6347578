//! On-board memories: BIOS ROM, external work RAM and internal work RAM.
//!
//! | Region | Size   | Mirroring                         |
//! |--------|--------|-----------------------------------|
//! | BIOS   | 16 KiB | none (reads outside are open bus) |
//! | EWRAM  | 256 KiB| every 256 KiB across `0x02xx_xxxx` |
//! | IWRAM  | 32 KiB | every 32 KiB across `0x03xx_xxxx`  |

use serde::{Deserialize, Serialize};
use serde_with::{Bytes, serde_as};

pub const BIOS_SIZE: usize = 0x4000;
pub const EWRAM_SIZE: usize = 0x4_0000;
pub const IWRAM_SIZE: usize = 0x8000;

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct InternalMemory {
    #[serde_as(as = "Bytes")]
    bios: [u8; BIOS_SIZE],
    #[serde_as(as = "Bytes")]
    ewram: [u8; EWRAM_SIZE],
    #[serde_as(as = "Bytes")]
    iwram: [u8; IWRAM_SIZE],
}

impl Default for InternalMemory {
    fn default() -> Self {
        Self {
            bios: [0; BIOS_SIZE],
            ewram: [0; EWRAM_SIZE],
            iwram: [0; IWRAM_SIZE],
        }
    }
}

impl InternalMemory {
    pub fn load_bios(&mut self, image: &[u8; BIOS_SIZE]) {
        self.bios.copy_from_slice(image);
    }

    #[must_use]
    pub const fn bios_read(&self, address: u32) -> u8 {
        self.bios[address as usize % BIOS_SIZE]
    }

    #[must_use]
    pub const fn ewram_read(&self, address: u32) -> u8 {
        self.ewram[address as usize % EWRAM_SIZE]
    }

    pub const fn ewram_write(&mut self, address: u32, value: u8) {
        self.ewram[address as usize % EWRAM_SIZE] = value;
    }

    #[must_use]
    pub const fn iwram_read(&self, address: u32) -> u8 {
        self.iwram[address as usize % IWRAM_SIZE]
    }

    pub const fn iwram_write(&mut self, address: u32, value: u8) {
        self.iwram[address as usize % IWRAM_SIZE] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ewram_mirrors_every_256k() {
        let mut memory = InternalMemory::default();
        memory.ewram_write(0x1234, 0xAB);
        assert_eq!(memory.ewram_read(0x1234), 0xAB);
        assert_eq!(memory.ewram_read(0x0004_1234), 0xAB);
        assert_eq!(memory.ewram_read(0x01FC_1234), 0xAB);
    }

    #[test]
    fn iwram_mirrors_every_32k() {
        let mut memory = InternalMemory::default();
        memory.iwram_write(0x7FFF, 0x42);
        assert_eq!(memory.iwram_read(0x7FFF), 0x42);
        assert_eq!(memory.iwram_read(0xFFFF), 0x42);
    }
}
