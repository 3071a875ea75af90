// Discrete-event scheduler driving virtual time

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hashbrown::HashMap;

use crate::vn_error::ScheduleError;
use crate::vn_interface::{SimDelay, SimTime};

/// Handle to a scheduled event, used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle {
    time: SimTime,
    seq: u64,
}

impl EventHandle {
    /// Virtual time the event is due
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Insertion order; breaks ties between events due at the same time
    pub fn id(&self) -> u64 {
        self.seq
    }
}

/// Single-threaded event queue ordered by `(timestamp, insertion order)`.
///
/// Actions are plain data (`A`); the owner pops them with [`Scheduler::next_event`]
/// or hands a handler to [`Scheduler::run_until`]. An action is removed from the
/// queue before it is returned, so cancelling a handle that already fired is a
/// no-op, including from inside its own handler.
///
/// # Example
///
/// ```
/// use vn_sim::vn_scheduler::Scheduler;
///
/// let mut scheduler: Scheduler<&str> = Scheduler::new();
/// scheduler.schedule(20, "late").unwrap();
/// scheduler.schedule(10, "early").unwrap();
///
/// let mut order = Vec::new();
/// scheduler.run_until(100, |_, _, action| order.push(action));
/// assert_eq!(order, vec!["early", "late"]);
/// assert_eq!(scheduler.now(), 100);
/// ```
pub struct Scheduler<A> {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Reverse<(SimTime, u64)>>,
    // cancelled events leave a stale heap entry behind; the map is authoritative
    pending: HashMap<u64, A>,
    executed: u64,
}

impl<A> Scheduler<A> {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            executed: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `action` to fire `delay` nanoseconds from now
    pub fn schedule(&mut self, delay: SimDelay, action: A) -> Result<EventHandle, ScheduleError> {
        if delay < 0 {
            return Err(ScheduleError::NegativeDelay(delay));
        }
        Ok(self.schedule_in(delay as SimTime, action))
    }

    /// Schedule `action` at an absolute virtual time, which must not be in the past
    pub fn schedule_at(&mut self, at: SimTime, action: A) -> Result<EventHandle, ScheduleError> {
        if at < self.now {
            return Err(ScheduleError::InPast { at, now: self.now });
        }
        Ok(self.insert(at, action))
    }

    /// Infallible variant of `schedule` for unsigned delays
    pub fn schedule_in(&mut self, delay: SimTime, action: A) -> EventHandle {
        let at = self.now.saturating_add(delay);
        self.insert(at, action)
    }

    fn insert(&mut self, at: SimTime, action: A) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((at, seq)));
        self.pending.insert(seq, action);
        EventHandle { time: at, seq }
    }

    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.seq).is_some()
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains_key(&handle.seq)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total number of events fired so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Time of the earliest live event, if any
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.queue.peek().map(|Reverse((time, _))| *time)
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, seq))) = self.queue.peek() {
            if self.pending.contains_key(seq) {
                break;
            }
            self.queue.pop();
        }
    }

    /// Pop the earliest event due strictly before `limit`, advancing the clock to it
    pub fn next_event(&mut self, limit: SimTime) -> Option<(EventHandle, A)> {
        loop {
            let Reverse((time, seq)) = *self.queue.peek()?;
            if time >= limit {
                return None;
            }
            self.queue.pop();

            if let Some(action) = self.pending.remove(&seq) {
                self.now = time;
                self.executed += 1;
                return Some((EventHandle { time, seq }, action));
            }
        }
    }

    /// Move the clock forward without firing anything. Never moves backwards.
    pub fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Fire events in order until the queue is empty or the next event is due
    /// at or after `limit`; the clock then rests at `limit`. Events due at
    /// `limit` stay queued for a later call.
    ///
    /// Returns the number of events fired by this call.
    pub fn run_until<F>(&mut self, limit: SimTime, mut handler: F) -> u64
    where
        F: FnMut(&mut Self, EventHandle, A),
    {
        let start = self.executed;
        while let Some((handle, action)) = self.next_event(limit) {
            handler(self, handle, action);
        }
        self.advance_to(limit);
        self.executed - start
    }
}

impl<A> Default for Scheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}
