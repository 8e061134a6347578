//! Serial I/O stub.
//!
//! There is no link-cable peer: the registers are readable and writable, and
//! starting a transfer with the internal clock completes after the right
//! number of cycles with the start bit cleared and (when enabled) the serial
//! interrupt requested. That is enough for software that waits on SIOCNT.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

#[derive(Serialize, Deserialize)]
pub struct Serial {
    pub sio_control: u16,
    pub sio_mode_select: u16,
    pub sio_data_32: u32,
    pub sio_data_8: u16,
    transfer_event: EventHandle,
}

impl Serial {
    pub fn new(scheduler: &mut Scheduler) -> Self {
        Self {
            sio_control: 0,
            sio_mode_select: 0,
            sio_data_32: 0,
            sio_data_8: 0,
            transfer_event: scheduler.register_handle(),
        }
    }

    pub fn read8(&self, address: u32) -> u8 {
        match address {
            0x120 => self.sio_data_32.get_byte(0),
            0x121 => self.sio_data_32.get_byte(1),
            0x122 => self.sio_data_32.get_byte(2),
            0x123 => self.sio_data_32.get_byte(3),
            0x128 => self.sio_control.get_byte(0),
            0x129 => self.sio_control.get_byte(1),
            0x12A => self.sio_data_8.get_byte(0),
            0x12B => self.sio_data_8.get_byte(1),
            0x134 => self.sio_mode_select.get_byte(0),
            0x135 => self.sio_mode_select.get_byte(1),
            _ => 0,
        }
    }

    pub fn write8(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        match address {
            0x120 => self.sio_data_32.set_byte(0, value),
            0x121 => self.sio_data_32.set_byte(1, value),
            0x122 => self.sio_data_32.set_byte(2, value),
            0x123 => self.sio_data_32.set_byte(3, value),
            0x128 => {
                self.sio_control.set_byte(0, value);
                if value & 1 != 0 && value & 0x80 != 0 {
                    self.schedule_dummy_transfer(scheduler);
                }
            }
            0x129 => self.sio_control.set_byte(1, value & 0x7F),
            0x12A => self.sio_data_8.set_byte(0, value),
            0x12B => self.sio_data_8.set_byte(1, value),
            0x134 => self.sio_mode_select.set_byte(0, value),
            0x135 => self.sio_mode_select.set_byte(1, value & 0x3E),
            _ => {}
        }
    }

    /// 256 KHz or 2 MHz per bit, for a byte or a word.
    fn schedule_dummy_transfer(&self, scheduler: &mut Scheduler) {
        let transfer_length: u64 = if self.sio_control.get_bit(12) { 32 } else { 8 };
        let cycles_per_bit: u64 = if self.sio_control.get_bit(1) { 8 } else { 64 };
        scheduler.schedule(
            self.transfer_event,
            EventKind::SioTransferDone,
            cycles_per_bit * transfer_length,
        );
    }

    /// Completion of the dummy transfer. Returns true when the serial
    /// interrupt should be requested.
    pub fn transfer_done(&mut self) -> bool {
        self.sio_control.set_bit(7, false);
        self.sio_control.get_bit(14)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn started_transfer_completes_after_the_bit_clock() {
        let mut scheduler = Scheduler::new();
        let mut serial = Serial::new(&mut scheduler);

        // Internal 256 KHz clock, start, IRQ enable: 8 bits x 64 cycles.
        serial.write8(0x129, 0x40, &mut scheduler);
        serial.write8(0x128, 0x81, &mut scheduler);
        assert_eq!(scheduler.next_event_time(), Some(512));

        scheduler.advance(512);
        assert_eq!(scheduler.pop_due().unwrap().kind, EventKind::SioTransferDone);
        assert!(serial.transfer_done());
        assert!(!serial.sio_control.get_bit(7));
    }

    #[test]
    fn word_transfers_take_four_times_as_long() {
        let mut scheduler = Scheduler::new();
        let mut serial = Serial::new(&mut scheduler);

        serial.write8(0x129, 0x10, &mut scheduler); // 32-bit mode
        serial.write8(0x128, 0x83, &mut scheduler); // start, 2 MHz clock
        assert_eq!(scheduler.next_event_time(), Some(8 * 32));
    }
}
