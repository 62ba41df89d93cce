use std::sync::Arc;

use crate::queue::{Deadline, Inner, Side, State};
use crate::timer::TimerHandle;

/// Deadline registration of one blocked call.
///
/// Records live in the queue state, one per call currently inside
/// `wait_read`/`wait_write`, so `expired` is only read or written under the
/// queue mutex and belongs to exactly one call. Every blocked call gets a
/// record, even without a deadline, so that a later reset can arm it.
#[derive(Debug)]
pub(crate) struct DeadlineTimer {
    id: u64,
    side: Side,
    deadline: Deadline,
    handle: Option<TimerHandle>,
    expired: bool,
}

impl DeadlineTimer {
    /// Registers a call on `side` and arms its timer. Returns the id the call
    /// checks for expiry and later hands to [`stop`](Self::stop).
    pub(crate) fn start<S: Send + 'static>(
        inner: &Arc<Inner<S>>,
        state: &mut State<S>,
        side: Side,
        deadline: Deadline,
    ) -> u64 {
        let id = state.allocate_timer_id();
        let mut timer = DeadlineTimer {
            id,
            side,
            deadline: Deadline::NONE,
            handle: None,
            expired: false,
        };
        timer.arm(inner, deadline);
        state.timers.push(timer);
        id
    }

    /// Cancels the call's registration (if still pending) and drops its record.
    /// Returns the deadline in force at that point, which a reset may have
    /// moved. A callback already running finds no record and does nothing.
    pub(crate) fn stop<S>(inner: &Inner<S>, state: &mut State<S>, id: u64) -> Option<Deadline> {
        let pos = state.timers.iter().position(|timer| timer.id == id)?;
        let mut timer = state.timers.swap_remove(pos);
        let deadline = timer.deadline;
        timer.disarm(inner);
        Some(deadline)
    }

    /// Moves the timer to `deadline` without creating a new record. A deadline
    /// that has already passed expires the timer on the spot; returns `true`
    /// in that case.
    pub(crate) fn reset<S: Send + 'static>(
        &mut self,
        inner: &Arc<Inner<S>>,
        deadline: Deadline,
    ) -> bool {
        self.disarm(inner);
        if deadline.is_past(&**inner.timekeeper().clock()) {
            self.deadline = deadline;
            self.expired = true;
            return true;
        }
        self.arm(inner, deadline);
        false
    }

    pub(crate) fn side(&self) -> Side {
        self.side
    }

    fn arm<S: Send + 'static>(&mut self, inner: &Arc<Inner<S>>, deadline: Deadline) {
        self.deadline = deadline;
        if deadline.is_none() {
            return;
        }
        let id = self.id;
        let queue = Arc::downgrade(inner);
        let handle = inner.timekeeper().timers().start(
            deadline.as_nanos(),
            Box::new(move || {
                if let Some(inner) = queue.upgrade() {
                    inner.expire(id);
                }
            }),
        );
        self.handle = Some(handle);
    }

    fn disarm<S>(&mut self, inner: &Inner<S>) {
        if let Some(handle) = self.handle.take() {
            inner.timekeeper().timers().stop(handle);
        }
        self.deadline = Deadline::NONE;
    }
}

impl<S> State<S> {
    /// Whether the timer of call `id` has fired. Calls without a record never
    /// see an expiry.
    pub(crate) fn timer_expired(&self, id: u64) -> bool {
        self.timers.iter().any(|timer| timer.id == id && timer.expired)
    }

    /// Flags call `id` as expired; `false` if the call already returned.
    pub(crate) fn mark_expired(&mut self, id: u64) -> bool {
        match self.timers.iter_mut().find(|timer| timer.id == id) {
            Some(timer) => {
                timer.expired = true;
                true
            }
            None => false,
        }
    }

    /// Calls currently blocked (or about to block) on `side`.
    pub(crate) fn blocked(&self, side: Side) -> usize {
        self.timers.iter().filter(|timer| timer.side == side).count()
    }
}
