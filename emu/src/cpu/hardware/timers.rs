//! The four hardware timers.
//!
//! A running timer never counts in this implementation: its value is derived
//! on demand from the cycle counter (`counter_at_start + elapsed /
//! prescaler`) and a single scheduler event marks the overflow. Cascade
//! timers have no event of their own; they increment when the preceding
//! timer overflows.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventHandle, EventKind, Scheduler};

const PRESCALER_SELECTIONS: [u64; 4] = [1, 64, 256, 1024];

#[derive(Serialize, Deserialize)]
pub struct Timers {
    reload: [u16; 4],
    counter: [u16; 4],
    control: [u16; 4],
    started_at: [u64; 4],
    overflow_events: [EventHandle; 4],
}

impl Timers {
    pub fn new(scheduler: &mut Scheduler) -> Self {
        Self {
            reload: [0; 4],
            counter: [0; 4],
            control: [0; 4],
            started_at: [0; 4],
            overflow_events: std::array::from_fn(|_| scheduler.register_handle()),
        }
    }

    fn prescaler(&self, timer: usize) -> u64 {
        PRESCALER_SELECTIONS[(self.control[timer] & 0b11) as usize]
    }

    fn is_cascade(&self, timer: usize) -> bool {
        // Timer 0 ignores the cascade bit.
        self.control[timer].get_bit(2) && timer != 0
    }

    fn is_running(&self, timer: usize) -> bool {
        self.control[timer].get_bit(7) && !self.is_cascade(timer)
    }

    pub fn irq_enabled(&self, timer: usize) -> bool {
        self.control[timer].get_bit(6)
    }

    /// Current count, derived from how long the timer has been running.
    fn current_value(&self, timer: usize, now: u64) -> u16 {
        if self.is_running(timer) {
            let ticks = (now - self.started_at[timer]) / self.prescaler(timer);
            self.counter[timer].wrapping_add(ticks as u16)
        } else {
            self.counter[timer]
        }
    }

    pub fn read8(&self, address: u32, now: u64) -> u8 {
        let timer = ((address - 0x100) / 4) as usize;
        match address & 0b11 {
            0 => self.current_value(timer, now).get_byte(0),
            1 => self.current_value(timer, now).get_byte(1),
            2 => self.control[timer].get_byte(0),
            _ => self.control[timer].get_byte(1),
        }
    }

    pub fn write8(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        let timer = ((address - 0x100) / 4) as usize;
        match address & 0b11 {
            // Writing CNT_L sets the reload value, not the live counter.
            0 => self.reload[timer].set_byte(0, value),
            1 => self.reload[timer].set_byte(1, value),
            2 => {
                let old_control = self.control[timer];
                self.control[timer].set_byte(0, value);
                self.update_timer(timer, old_control, scheduler);
            }
            _ => self.control[timer].set_byte(1, value),
        }
    }

    fn update_timer(&mut self, timer: usize, old_control: u16, scheduler: &mut Scheduler) {
        let new_enable = self.control[timer].get_bit(7);
        let old_enable = old_control.get_bit(7);
        let new_cascade = self.control[timer].get_bit(2) && timer != 0;
        let old_cascade = old_control.get_bit(2) && timer != 0;

        if new_enable && !old_enable {
            self.counter[timer] = self.reload[timer];
        }

        // Started by setting enable while cascade is clear, or clearing
        // cascade while enabled; stopped by the opposite transitions.
        if (new_enable && !old_enable && !new_cascade)
            || (!new_cascade && old_cascade && new_enable)
        {
            self.start_timer(timer, scheduler);
        } else if (!new_enable && old_enable && !new_cascade)
            || (new_cascade && !old_cascade && new_enable && old_enable)
        {
            self.stop_timer(timer, scheduler);
        }
    }

    fn start_timer(&mut self, timer: usize, scheduler: &mut Scheduler) {
        tracing::debug!("timer {timer} started");

        let cycles_till_overflow =
            (0x10000 - u64::from(self.counter[timer])) * self.prescaler(timer);
        self.started_at[timer] = scheduler.now();
        scheduler.schedule(
            self.overflow_events[timer],
            EventKind::TimerOverflow(timer),
            cycles_till_overflow,
        );
    }

    fn stop_timer(&mut self, timer: usize, scheduler: &mut Scheduler) {
        tracing::debug!("timer {timer} stopped");

        self.counter[timer] = self.current_value(timer, scheduler.now());
        scheduler.cancel(self.overflow_events[timer]);
    }

    /// Handles a fired overflow event for `timer`: reload, reschedule, and
    /// walk the cascade chain. Returns the bitmask of timers that
    /// overflowed (cascades included).
    ///
    /// The reschedule anchors on the event's own fire time, so a dispatch
    /// that arrives several periods late replays every missed overflow
    /// within the same drain.
    pub fn handle_overflow(&mut self, timer: usize, late: u64, scheduler: &mut Scheduler) -> u8 {
        let mut overflowed = 0;
        self.overflow(timer, &mut overflowed);

        let fired_at = scheduler.now() - late;
        let period = (0x10000 - u64::from(self.counter[timer])) * self.prescaler(timer);
        self.started_at[timer] = fired_at;
        scheduler.schedule_at(
            self.overflow_events[timer],
            EventKind::TimerOverflow(timer),
            fired_at + period,
        );

        overflowed
    }

    fn overflow(&mut self, timer: usize, overflowed: &mut u8) {
        self.counter[timer] = self.reload[timer];
        *overflowed |= 1 << timer;

        // A cascade timer ticks once per overflow of its predecessor, even
        // though no prescaler tick occurred.
        if timer < 3 && self.control[timer + 1].get_bit(2) && self.control[timer + 1].get_bit(7) {
            let (next, wrapped) = self.counter[timer + 1].overflowing_add(1);
            self.counter[timer + 1] = next;
            if wrapped {
                self.overflow(timer + 1, overflowed);
            }
        }
    }
}
