//! Event scheduler driving every timed piece of hardware.
//!
//! The whole console advances on a single 64-bit cycle counter (one unit =
//! one CPU cycle at ~16.78 MHz). Peripherals schedule work as timestamped
//! events; the bus drains due events whenever it charges cycles for a memory
//! access. A 64-bit timestamp does not overflow for tens of thousands of
//! years of emulated time, so no wrapping logic is needed anywhere.
//!
//! Events are identified by a stable [`EventHandle`] issued once per slot at
//! registration, so a subsystem can replace or cancel its own pending event
//! without searching the queue by kind.

use std::cmp::Ordering;

use binary_heap_plus::{BinaryHeap, MinComparator};
use serde::{Deserialize, Serialize};

/// What to do when an event fires. The bus owns the dispatch table: it maps
/// each kind to the peripheral method that handles it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Dot 240 of a scanline: raise the HBlank flag, draw the line.
    HblankStart,
    /// Dot 308: advance to the next scanline, VBlank/VCount bookkeeping.
    HblankEnd,
    /// Timer `n` reached 0x10000.
    TimerOverflow(usize),
    /// DMA channel `n` becomes active (start is delayed two cycles).
    DmaStart(usize),
    /// Mixer tick: produce one stereo sample pair.
    ApuSample,
    /// Pulse channel `n` (0 or 1) advances its duty phase.
    ApuPulseTick(usize),
    /// Wave channel advances its sample position.
    ApuWaveTick,
    /// Noise channel clocks its LFSR.
    ApuNoiseTick,
    /// A dummy serial transfer completed.
    SioTransferDone,
}

pub type EventHandle = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Event {
    pub handle: EventHandle,
    pub kind: EventKind,
    pub fire_at: u64,
    /// Insertion counter, breaks `fire_at` ties in FIFO order.
    seq: u64,
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

pub struct Scheduler {
    // Want the earliest timestamp first, so MinComparator
    queue: BinaryHeap<Event, MinComparator>,
    now: u64,
    handle_counter: EventHandle,
    seq_counter: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::with_capacity_min(32),
            now: 0,
            handle_counter: 0,
            seq_counter: 0,
        }
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a stable identifier for an event slot. Each subsystem calls
    /// this once per periodic job at construction time.
    pub fn register_handle(&mut self) -> EventHandle {
        let handle = self.handle_counter;
        self.handle_counter += 1;
        handle
    }

    /// Insert the event, replacing any pending event with the same handle.
    pub fn schedule(&mut self, handle: EventHandle, kind: EventKind, cycles_from_now: u64) {
        self.schedule_at(handle, kind, self.now + cycles_from_now);
    }

    /// Like [`Self::schedule`] but with an absolute timestamp. Periodic
    /// handlers reschedule at `fired_at + period` so a late dispatch never
    /// drifts the cadence; a timestamp already in the past fires in the
    /// current drain.
    pub fn schedule_at(&mut self, handle: EventHandle, kind: EventKind, fire_at: u64) {
        self.cancel(handle);
        let seq = self.seq_counter;
        self.seq_counter += 1;
        self.queue.push(Event {
            handle,
            kind,
            fire_at,
            seq,
        });
    }

    /// Remove the event with this handle if one is pending. Cancelling a
    /// non-pending handle is a no-op. N is small (a dozen or so events), so
    /// a linear rebuild of the heap is fine here.
    pub fn cancel(&mut self, handle: EventHandle) {
        if self.queue.iter().any(|e| e.handle == handle) {
            let drained = std::mem::replace(&mut self.queue, BinaryHeap::with_capacity_min(32));
            self.queue = BinaryHeap::from_vec(
                drained
                    .into_vec()
                    .into_iter()
                    .filter(|e| e.handle != handle)
                    .collect(),
            );
        }
    }

    /// Advance the clock. The caller is expected to drain due events with
    /// [`Self::pop_due`] afterwards.
    pub const fn advance(&mut self, delta: u64) {
        self.now += delta;
    }

    /// Jump the clock to the next event's timestamp, if any.
    pub fn advance_to_next(&mut self) {
        if let Some(fire_at) = self.next_event_time() {
            self.now = self.now.max(fire_at);
        }
    }

    /// Pop the earliest event whose `fire_at` is at or before the current
    /// time. Events pushed while draining are picked up in the same drain
    /// when they land inside the advanced window.
    pub fn pop_due(&mut self) -> Option<Event> {
        if self.queue.peek().is_some_and(|e| e.fire_at <= self.now) {
            return self.queue.pop();
        }
        None
    }

    #[must_use]
    pub fn next_event_time(&self) -> Option<u64> {
        self.queue.peek().map(|e| e.fire_at)
    }

    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(scheduler: &mut Scheduler) -> Vec<Event> {
        let mut fired = Vec::new();
        while let Some(event) = scheduler.pop_due() {
            fired.push(event);
        }
        fired
    }

    #[test]
    fn fires_in_timestamp_order() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.register_handle();
        let b = scheduler.register_handle();
        let c = scheduler.register_handle();

        scheduler.schedule(a, EventKind::HblankStart, 30);
        scheduler.schedule(b, EventKind::HblankEnd, 10);
        scheduler.schedule(c, EventKind::ApuSample, 20);

        scheduler.advance(30);
        let fired: Vec<_> = drain(&mut scheduler).iter().map(|e| e.handle).collect();
        assert_eq!(fired, vec![b, c, a]);
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut scheduler = Scheduler::new();
        let handles: Vec<_> = (0..5).map(|_| scheduler.register_handle()).collect();
        for &handle in &handles {
            scheduler.schedule(handle, EventKind::ApuSample, 100);
        }

        scheduler.advance(100);
        let fired: Vec<_> = drain(&mut scheduler).iter().map(|e| e.handle).collect();
        assert_eq!(fired, handles);
    }

    #[test]
    fn nothing_due_before_timestamp() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.register_handle();
        scheduler.schedule(handle, EventKind::ApuSample, 50);

        scheduler.advance(49);
        assert!(scheduler.pop_due().is_none());
        scheduler.advance(1);
        assert!(scheduler.pop_due().is_some());
    }

    #[test]
    fn schedule_replaces_pending_event_with_same_handle() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.register_handle();

        scheduler.schedule(handle, EventKind::ApuSample, 10);
        scheduler.schedule(handle, EventKind::ApuSample, 500);

        scheduler.advance(10);
        assert!(scheduler.pop_due().is_none());

        scheduler.advance(490);
        let event = scheduler.pop_due().unwrap();
        assert_eq!(event.fire_at, 500);
        assert!(scheduler.pop_due().is_none());
    }

    #[test]
    fn cancel_then_reschedule_equals_single_insert() {
        let mut scheduler = Scheduler::new();
        let noise = scheduler.register_handle();
        let handle = scheduler.register_handle();
        scheduler.schedule(noise, EventKind::HblankStart, 75);

        scheduler.schedule(handle, EventKind::ApuSample, 10);
        scheduler.cancel(handle);
        scheduler.schedule(handle, EventKind::ApuSample, 50);

        scheduler.advance(100);
        let fired: Vec<_> = drain(&mut scheduler)
            .iter()
            .map(|e| (e.handle, e.fire_at))
            .collect();
        assert_eq!(fired, vec![(handle, 50), (noise, 75)]);
    }

    #[test]
    fn cancel_missing_handle_is_a_noop() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.register_handle();
        scheduler.cancel(handle);
        assert_eq!(scheduler.next_event_time(), None);
    }

    #[test]
    fn advance_to_next_lands_exactly_on_the_event() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.register_handle();
        scheduler.schedule(handle, EventKind::HblankStart, 960);

        scheduler.advance_to_next();
        assert_eq!(scheduler.now(), 960);
        let event = scheduler.pop_due().unwrap();
        assert_eq!(event.fire_at, 960);
    }

    #[test]
    fn lateness_is_visible_to_the_dispatcher() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.register_handle();
        scheduler.schedule(handle, EventKind::TimerOverflow(0), 10);

        scheduler.advance(17);
        let event = scheduler.pop_due().unwrap();
        assert_eq!(scheduler.now() - event.fire_at, 7);
    }
}
