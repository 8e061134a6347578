//! Hardware components reached through the memory bus.
//!
//! | Module                | Description                             | I/O range         |
//! |-----------------------|-----------------------------------------|-------------------|
//! | [`internal_memory`]   | BIOS, EWRAM, IWRAM                      | (memory regions)  |
//! | [`lcd`]               | LCD controller / PPU                    | `0x000-0x057`     |
//! | [`sound`]             | PSG channels, FIFOs, mixer              | `0x060-0x0A7`     |
//! | [`dma`]               | 4-channel DMA controller                | `0x0B0-0x0DF`     |
//! | [`timers`]            | 4 cascadable timers                     | `0x100-0x10F`     |
//! | [`serial`]            | Serial communication stub               | `0x120-0x15B`     |
//! | [`keypad`]            | Button input and the keypad interrupt   | `0x130-0x133`     |
//! | [`interrupt_control`] | IE / IF / IME                           | `0x200-0x209`     |

pub mod dma;
pub mod internal_memory;
pub mod interrupt_control;
pub mod keypad;
pub mod lcd;
pub mod serial;
pub mod sound;
pub mod timers;
