//! One-shot deadline callbacks.
//!
//! The queues never sleep on a clock themselves. They register a callback at an
//! absolute deadline through a [`TimerService`] and block on their condition
//! variables until the callback (or data, or close) wakes them.
//!
//! Callbacks always run with no timer lock held, so a callback is free to take
//! a queue mutex while another thread, holding that same queue mutex, calls
//! [`TimerService::stop`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::clock::{Clock, ManualClock, SystemClock};

/// Upper bound on a single park of the timer thread, so clocks that do not
/// track wall time are still re-read regularly.
const MAX_PARK: Duration = Duration::from_millis(100);

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

pub trait TimerService: Send + Sync + 'static {
    /// Registers `callback` to run once, at or after `deadline_ns`.
    fn start(&self, deadline_ns: u64, callback: TimerCallback) -> TimerHandle;

    /// Cancels a registration. Returns `true` if it was still pending, `false`
    /// if it already fired (or is firing) or was stopped before.
    fn stop(&self, handle: TimerHandle) -> bool;
}

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    pending: HashMap<u64, TimerCallback>,
    by_deadline: BinaryHeap<Reverse<(u64, u64)>>,
}

impl TimerTable {
    fn insert(&mut self, deadline_ns: u64, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, callback);
        self.by_deadline.push(Reverse((deadline_ns, id)));
        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle.0).is_some()
    }

    /// Earliest deadline still pending; cancelled heap entries are dropped here.
    fn next_deadline(&mut self) -> Option<u64> {
        while let Some(Reverse((deadline, id))) = self.by_deadline.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(deadline);
            }
            self.by_deadline.pop();
        }
        None
    }

    fn take_due(&mut self, now_ns: u64) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        while let Some(deadline) = self.next_deadline() {
            if deadline > now_ns {
                break;
            }
            if let Some(Reverse((_, id))) = self.by_deadline.pop() {
                if let Some(callback) = self.pending.remove(&id) {
                    due.push(callback);
                }
            }
        }
        due
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

fn lock_table(table: &Mutex<TimerTable>) -> MutexGuard<'_, TimerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    table: Mutex<TimerTable>,
    wake: Condvar,
    shutdown: AtomicBool,
    clock: Arc<dyn Clock>,
}

/// Timer service backed by a single background thread.
pub struct ThreadTimerService {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl ThreadTimerService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            table: Mutex::new(TimerTable::default()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            clock,
        });
        let thread_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || run_timer_thread(&thread_shared));
        let worker_id = worker.thread().id();
        log::debug!("timer thread {worker_id:?} started");
        Self {
            shared,
            worker: Some(worker),
            worker_id,
        }
    }

    /// Number of registrations that have neither fired nor been stopped.
    pub fn pending(&self) -> usize {
        lock_table(&self.shared.table).len()
    }
}

impl Default for ThreadTimerService {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TimerService for ThreadTimerService {
    fn start(&self, deadline_ns: u64, callback: TimerCallback) -> TimerHandle {
        let handle = lock_table(&self.shared.table).insert(deadline_ns, callback);
        self.shared.wake.notify_one();
        handle
    }

    fn stop(&self, handle: TimerHandle) -> bool {
        lock_table(&self.shared.table).cancel(handle)
    }
}

impl Drop for ThreadTimerService {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = lock_table(&self.shared.table);
            self.shared.wake.notify_all();
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        // A callback may own the last reference to the service; the thread
        // exits on its own once the callback returns.
        if thread::current().id() == self.worker_id {
            return;
        }
        let _ = worker.join();
        log::debug!("timer thread {:?} stopped", self.worker_id);
    }
}

fn run_timer_thread(shared: &Shared) {
    let mut table = lock_table(&shared.table);
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let now = shared.clock.now();
        let due = table.take_due(now);
        if !due.is_empty() {
            drop(table);
            log::trace!("firing {} timer(s) at {now}", due.len());
            for callback in due {
                callback();
            }
            table = lock_table(&shared.table);
            continue;
        }
        table = match table.next_deadline() {
            Some(deadline) => {
                let park = Duration::from_nanos(deadline.saturating_sub(now)).min(MAX_PARK);
                shared
                    .wake
                    .wait_timeout(table, park)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .wake
                .wait(table)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

/// Timer service that fires only when driven by the caller.
///
/// Time comes from a shared [`ManualClock`]; [`advance`](Self::advance) moves the
/// clock and runs every callback whose deadline has been reached, on the
/// calling thread.
pub struct ManualTimerService {
    clock: Arc<ManualClock>,
    table: Mutex<TimerTable>,
}

impl ManualTimerService {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            table: Mutex::new(TimerTable::default()),
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Moves the clock forward and fires whatever became due. Returns the
    /// number of callbacks run.
    ///
    /// Callbacks run on the calling thread before this returns. Queue expiry
    /// callbacks take the queue mutex, so never call this while holding a
    /// queue lock or from inside another timer callback.
    pub fn advance(&self, delta_ns: u64) -> usize {
        self.clock.advance(delta_ns);
        self.fire_due()
    }

    /// Runs every callback due at the current clock value, on the calling
    /// thread. Same locking caveat as [`advance`](Self::advance).
    pub fn fire_due(&self) -> usize {
        let due = lock_table(&self.table).take_due(self.clock.now());
        let fired = due.len();
        for callback in due {
            callback();
        }
        fired
    }

    pub fn pending(&self) -> usize {
        lock_table(&self.table).len()
    }
}

impl TimerService for ManualTimerService {
    fn start(&self, deadline_ns: u64, callback: TimerCallback) -> TimerHandle {
        lock_table(&self.table).insert(deadline_ns, callback)
    }

    fn stop(&self, handle: TimerHandle) -> bool {
        lock_table(&self.table).cancel(handle)
    }
}

/// The clock and timer service a queue is built with.
#[derive(Clone)]
pub struct Timekeeper {
    clock: Arc<dyn Clock>,
    timers: Arc<dyn TimerService>,
}

impl Timekeeper {
    pub fn new(clock: Arc<dyn Clock>, timers: Arc<dyn TimerService>) -> Self {
        Self { clock, timers }
    }

    /// A deterministic pair: the returned service owns the clock and only
    /// fires on [`ManualTimerService::advance`].
    pub fn manual(start_ns: u64) -> (Self, Arc<ManualTimerService>) {
        let clock = Arc::new(ManualClock::new(start_ns));
        let timers = Arc::new(ManualTimerService::new(Arc::clone(&clock)));
        (Self::new(clock, timers.clone()), timers)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn timers(&self) -> &Arc<dyn TimerService> {
        &self.timers
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}

impl Default for Timekeeper {
    /// Wall clock plus one process-wide timer thread, started on first use.
    fn default() -> Self {
        static SHARED: OnceLock<Timekeeper> = OnceLock::new();
        SHARED
            .get_or_init(|| {
                let clock: Arc<dyn Clock> = Arc::new(SystemClock);
                let timers = Arc::new(ThreadTimerService::new(Arc::clone(&clock)));
                Timekeeper::new(clock, timers)
            })
            .clone()
    }
}

impl fmt::Debug for Timekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timekeeper")
            .field("now_ns", &self.clock.now())
            .finish_non_exhaustive()
    }
}
