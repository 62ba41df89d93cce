//! Bounded, deadline-aware queues that emulate blocking stream and datagram I/O.
//!
//! [`BoundedQueue`] holds the synchronization core: a power-of-two ring indexed by
//! two ever-increasing cursors, one mutex, and two condition variables
//! (`readable`, `writable`). [`ByteQueue`] and [`MessageQueue`] own a core each
//! and only add the copy step.
//!
//! Waking policy:
//! - data or space becoming available wakes one waiter on the opposite side;
//! - a call that takes less than what is available wakes one more waiter on
//!   its own side, so a second reader (or writer) can use the remainder;
//! - close and deadline expiry wake everyone on both sides.
//!
//! Each blocked call owns its own deadline record in the queue state, so one
//! caller's expiry never times out another caller on the same side.

pub mod bytes;
pub(crate) mod deadline;
pub mod message;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::timer::Timekeeper;

use self::deadline::DeadlineTimer;

pub use self::bytes::ByteQueue;
pub use self::message::{MessageQueue, SendError};

pub const DEFAULT_BYTE_CAPACITY: usize = 4096;
pub const DEFAULT_MESSAGE_CAPACITY: usize = 32;

/// Absolute point in time, in nanoseconds since the UNIX epoch, after which a
/// blocking call fails. Zero means "wait forever".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(u64);

impl Deadline {
    pub const NONE: Deadline = Deadline(0);

    pub const fn at(nanos: u64) -> Self {
        Deadline(nanos)
    }

    /// `timeout` from now on `clock`. Never yields [`Deadline::NONE`].
    pub fn after(clock: &dyn Clock, timeout: Duration) -> Self {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        Deadline(clock.now().saturating_add(timeout_ns).max(1))
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn is_past(self, clock: &dyn Clock) -> bool {
        self.0 > 0 && self.0 < clock.now()
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Number of slots (bytes or messages). Must be a non-zero power of two.
    pub capacity: usize,
    pub timekeeper: Timekeeper,
}

impl QueueConfig {
    pub fn byte_stream() -> Self {
        Self {
            capacity: DEFAULT_BYTE_CAPACITY,
            timekeeper: Timekeeper::default(),
        }
    }

    pub fn message() -> Self {
        Self {
            capacity: DEFAULT_MESSAGE_CAPACITY,
            timekeeper: Timekeeper::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_timekeeper(mut self, timekeeper: Timekeeper) -> Self {
        self.timekeeper = timekeeper;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Read,
    Write,
}

/// Everything guarded by the queue mutex.
pub(crate) struct State<S> {
    /// Total units read; only ever grows (wrapping).
    pub(crate) r: usize,
    /// Total units written; `w - r` is the occupancy.
    pub(crate) w: usize,
    pub(crate) closed: bool,
    /// One record per call inside `wait_read`/`wait_write`.
    timers: Vec<DeadlineTimer>,
    next_timer_id: u64,
    pub(crate) storage: S,
}

impl<S> State<S> {
    pub(crate) fn occupancy(&self) -> usize {
        self.w.wrapping_sub(self.r)
    }

    pub(crate) fn allocate_timer_id(&mut self) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id = self.next_timer_id.wrapping_add(1);
        id
    }
}

pub(crate) type Guard<'a, S> = MutexGuard<'a, State<S>>;

pub(crate) struct Inner<S> {
    state: Mutex<State<S>>,
    readable: Condvar,
    writable: Condvar,
    mask: usize,
    timekeeper: Timekeeper,
}

impl<S> Inner<S> {
    fn lock(&self) -> Guard<'_, S> {
        // Every mutation is a cursor bump after a finished copy, so a panic
        // elsewhere cannot leave the ring half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn timekeeper(&self) -> &Timekeeper {
        &self.timekeeper
    }

    /// Deadline timer callback. Stale firings (the call already returned and
    /// dropped its record) do nothing.
    pub(crate) fn expire(&self, id: u64) {
        let mut state = self.lock();
        if !state.mark_expired(id) {
            return;
        }
        log::trace!("deadline expired (timer {id})");
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// The shared synchronization core. Clones refer to the same queue.
pub struct BoundedQueue<S> {
    inner: Arc<Inner<S>>,
}

impl<S: Send + 'static> BoundedQueue<S> {
    /// Builds a queue of `capacity` slots; `storage` receives the validated
    /// capacity and returns the backing ring.
    pub(crate) fn with_storage(
        capacity: usize,
        timekeeper: Timekeeper,
        storage: impl FnOnce(usize) -> S,
    ) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(Error::InvalidCapacity(capacity));
        }
        let state = State {
            r: 0,
            w: 0,
            closed: false,
            timers: Vec::new(),
            next_timer_id: 0,
            storage: storage(capacity),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                readable: Condvar::new(),
                writable: Condvar::new(),
                mask: capacity - 1,
                timekeeper,
            }),
        })
    }

    pub(crate) fn lock(&self) -> Guard<'_, S> {
        self.inner.lock()
    }

    pub(crate) fn mask(&self) -> usize {
        self.inner.mask
    }

    /// Blocks until at least one unit is readable, the queue is closed, or
    /// `deadline` passes. Returns how many units (at most `n`) the caller must
    /// now copy out before releasing the guard.
    ///
    /// A closed, drained queue yields `Ok(0)`.
    pub(crate) fn wait_read<'a>(
        &'a self,
        mut state: Guard<'a, S>,
        n: usize,
        deadline: Deadline,
    ) -> (Guard<'a, S>, Result<usize>) {
        let inner = &*self.inner;
        if deadline.is_past(&**inner.timekeeper.clock()) {
            log::trace!("read deadline {} already passed", deadline.as_nanos());
            return (state, Err(Error::unavailable()));
        }
        let id = DeadlineTimer::start(&self.inner, &mut state, Side::Read, deadline);
        state = inner
            .readable
            .wait_while(state, |s| s.occupancy() == 0 && !s.closed && !s.timer_expired(id))
            .unwrap_or_else(PoisonError::into_inner);
        let expired = state.timer_expired(id);
        DeadlineTimer::stop(inner, &mut state, id);

        let available = state.occupancy();
        if available == 0 && expired {
            return (state, Err(Error::unavailable()));
        }
        let mut count = available;
        if count > n {
            count = n;
            inner.readable.notify_one();
        }
        inner.writable.notify_one();
        (state, Ok(count))
    }

    /// Blocks until at least one slot is free, the queue is closed, or
    /// `deadline` passes. Returns how many units (at most `n`) the caller must
    /// now copy in before releasing the guard. Never returns `Ok(0)`.
    ///
    /// `deadline` is updated to whatever a concurrent reset moved it to, so
    /// the next chunk of a multi-chunk write keeps honouring it.
    pub(crate) fn wait_write<'a>(
        &'a self,
        mut state: Guard<'a, S>,
        n: usize,
        deadline: &mut Deadline,
    ) -> (Guard<'a, S>, Result<usize>) {
        let inner = &*self.inner;
        if deadline.is_past(&**inner.timekeeper.clock()) {
            log::trace!("write deadline {} already passed", deadline.as_nanos());
            return (state, Err(Error::unavailable()));
        }
        let capacity = inner.mask + 1;
        let id = DeadlineTimer::start(&self.inner, &mut state, Side::Write, *deadline);
        state = inner
            .writable
            .wait_while(state, |s| {
                s.occupancy() >= capacity && !s.closed && !s.timer_expired(id)
            })
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = DeadlineTimer::stop(inner, &mut state, id) {
            *deadline = current;
        }

        let free = capacity - state.occupancy();
        if free == 0 {
            return (state, Err(Error::unavailable()));
        }
        let mut count = free;
        if count > n {
            count = n;
            inner.writable.notify_one();
        }
        inner.readable.notify_one();
        (state, Ok(count))
    }

    /// Moves the deadline of every call currently blocked on `side`. Calls that
    /// start later use the deadline they are given.
    pub(crate) fn reset_deadline(&self, side: Side, deadline: Deadline) {
        let mut state = self.lock();
        let mut expired = false;
        for timer in state.timers.iter_mut().filter(|timer| timer.side() == side) {
            expired |= timer.reset(&self.inner, deadline);
        }
        if expired {
            log::trace!("{side:?} deadline reset into the past");
            self.inner.readable.notify_all();
            self.inner.writable.notify_all();
        }
    }

    /// Calls currently blocked on `side`.
    pub(crate) fn blocked(&self, side: Side) -> usize {
        self.lock().blocked(side)
    }

    /// Marks the queue closed forever and wakes every blocked caller.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            log::debug!("closing queue with {} unit(s) buffered", state.occupancy());
        }
        state.closed = true;
        self.inner.readable.notify_all();
        self.inner.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Units currently buffered.
    pub fn len(&self) -> usize {
        self.lock().occupancy()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }

    pub fn timekeeper(&self) -> &Timekeeper {
        self.inner.timekeeper()
    }
}

impl<S> Clone for BoundedQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for BoundedQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &(self.inner.mask + 1))
            .field("r", &state.r)
            .field("w", &state.w)
            .field("closed", &state.closed)
            .finish()
    }
}
