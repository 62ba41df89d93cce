use std::collections::VecDeque;
use std::fmt;

use crate::error::{Error, Result};
use crate::queue::{BoundedQueue, Deadline, QueueConfig, Side};
use crate::timer::Timekeeper;

/// Whole-message queue: one slot holds one message, and messages are never
/// split.
pub struct MessageQueue<T> {
    core: BoundedQueue<Box<[Option<T>]>>,
}

/// A message that could not be queued, handed back to the sender.
#[derive(Debug)]
pub struct SendError<T> {
    pub message: T,
    pub error: Error,
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message not sent: {}", self.error)
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T: Send + 'static> MessageQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_timekeeper(capacity, Timekeeper::default())
    }

    pub fn with_timekeeper(capacity: usize, timekeeper: Timekeeper) -> Result<Self> {
        let core = BoundedQueue::with_storage(capacity, timekeeper, |capacity| {
            (0..capacity).map(|_| None).collect::<Vec<_>>().into_boxed_slice()
        })?;
        Ok(Self { core })
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        Self::with_timekeeper(config.capacity, config.timekeeper)
    }

    /// Moves up to `max` messages onto the end of `dst`, blocking until at
    /// least one is queued, the queue closes, or `deadline` passes.
    ///
    /// Returns `Ok(0)` once the queue is closed and drained.
    pub fn read(&self, dst: &mut Vec<T>, max: usize, deadline: Deadline) -> Result<usize> {
        self.read_with(dst, max, || deadline)
    }

    /// [`read`](Self::read) with the deadline looked up under the queue lock.
    pub(crate) fn read_with(
        &self,
        dst: &mut Vec<T>,
        max: usize,
        deadline: impl FnOnce() -> Deadline,
    ) -> Result<usize> {
        let state = self.core.lock();
        let deadline = deadline();
        let (mut state, waited) = self.core.wait_read(state, max, deadline);
        let n = waited?;
        let mask = self.core.mask();
        dst.reserve(n);
        for _ in 0..n {
            let slot = state.r & mask;
            if let Some(message) = state.storage[slot].take() {
                dst.push(message);
            }
            state.r = state.r.wrapping_add(1);
        }
        Ok(n)
    }

    /// Receives one message; `Ok(None)` means closed and drained.
    pub fn recv(&self, deadline: Deadline) -> Result<Option<T>> {
        let mut out = Vec::with_capacity(1);
        self.read(&mut out, 1, deadline)?;
        Ok(out.pop())
    }

    /// Queues messages from the front of `src` until it is empty.
    ///
    /// On failure the messages already queued are gone from `src`, the rest
    /// remain there, and the error reports how many were taken.
    pub fn write(&self, src: &mut VecDeque<T>, deadline: Deadline) -> Result<usize> {
        let mask = self.core.mask();
        let mut state = self.core.lock();
        let mut deadline = deadline;
        let mut written = 0;
        while !src.is_empty() {
            let (guard, waited) = self.core.wait_write(state, src.len(), &mut deadline);
            state = guard;
            let n = match waited {
                Ok(n) => n,
                Err(Error::TemporarilyUnavailable { .. }) => {
                    return Err(Error::TemporarilyUnavailable {
                        transferred: written,
                    })
                }
                Err(err) => return Err(err),
            };
            for message in src.drain(..n) {
                let slot = state.w & mask;
                state.storage[slot] = Some(message);
                state.w = state.w.wrapping_add(1);
            }
            written += n;
        }
        Ok(written)
    }

    pub fn send(&self, message: T, deadline: Deadline) -> std::result::Result<(), SendError<T>> {
        let mut src = VecDeque::with_capacity(1);
        src.push_back(message);
        match self.write(&mut src, deadline) {
            Ok(_) => Ok(()),
            Err(error) => match src.pop_front() {
                Some(message) => Err(SendError { message, error }),
                None => Ok(()),
            },
        }
    }

    /// Moves the deadline of reads blocked right now.
    pub fn reset_read_deadline(&self, deadline: Deadline) {
        self.core.reset_deadline(Side::Read, deadline);
    }

    pub fn reset_write_deadline(&self, deadline: Deadline) {
        self.core.reset_deadline(Side::Write, deadline);
    }

    pub fn blocked_readers(&self) -> usize {
        self.core.blocked(Side::Read)
    }

    pub fn blocked_writers(&self) -> usize {
        self.core.blocked(Side::Write)
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T> fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageQueue").field(&self.core).finish()
    }
}
