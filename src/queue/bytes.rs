use std::fmt;

use crate::error::{Error, Result};
use crate::queue::{BoundedQueue, Deadline, QueueConfig, Side};
use crate::timer::Timekeeper;

/// Byte stream queue: a ring of `capacity` bytes with partial reads and
/// chunked writes.
#[derive(Clone)]
pub struct ByteQueue {
    core: BoundedQueue<Box<[u8]>>,
}

impl ByteQueue {
    /// A queue on the default [`Timekeeper`].
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_timekeeper(capacity, Timekeeper::default())
    }

    pub fn with_timekeeper(capacity: usize, timekeeper: Timekeeper) -> Result<Self> {
        let core = BoundedQueue::with_storage(capacity, timekeeper, |capacity| {
            vec![0u8; capacity].into_boxed_slice()
        })?;
        Ok(Self { core })
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        Self::with_timekeeper(config.capacity, config.timekeeper)
    }

    /// Reads up to `buf.len()` bytes, blocking until at least one byte is
    /// buffered, the queue closes, or `deadline` passes.
    ///
    /// Returns `Ok(0)` once the queue is closed and drained. An empty `buf`
    /// still waits like any other read.
    pub fn read(&self, buf: &mut [u8], deadline: Deadline) -> Result<usize> {
        self.read_with(buf, || deadline)
    }

    /// Like [`read`](Self::read), with the deadline looked up under the queue
    /// lock so that it cannot miss a concurrent
    /// [`reset_read_deadline`](Self::reset_read_deadline).
    pub(crate) fn read_with(
        &self,
        buf: &mut [u8],
        deadline: impl FnOnce() -> Deadline,
    ) -> Result<usize> {
        let state = self.core.lock();
        let deadline = deadline();
        let (mut state, waited) = self.core.wait_read(state, buf.len(), deadline);
        let n = waited?;
        let mask = self.core.mask();
        let mut copied = 0;
        // At most two segments: up to the end of the ring, then from its start.
        while copied < n {
            let start = state.r & mask;
            let chunk = (n - copied).min(state.storage.len() - start);
            buf[copied..copied + chunk].copy_from_slice(&state.storage[start..start + chunk]);
            state.r = state.r.wrapping_add(chunk);
            copied += chunk;
        }
        Ok(n)
    }

    /// Writes all of `buf`, in as many chunks as free space allows.
    ///
    /// Not atomic: if the deadline passes (or the queue is closed and full)
    /// part-way through, the bytes already queued stay queued and the error
    /// carries their count in [`Error::transferred`].
    pub fn write(&self, buf: &[u8], deadline: Deadline) -> Result<usize> {
        self.write_with(buf, || deadline)
    }

    pub(crate) fn write_with(
        &self,
        buf: &[u8],
        deadline: impl FnOnce() -> Deadline,
    ) -> Result<usize> {
        let mask = self.core.mask();
        let mut state = self.core.lock();
        let mut deadline = deadline();
        let mut written = 0;
        while written < buf.len() {
            let (guard, waited) = self.core.wait_write(state, buf.len() - written, &mut deadline);
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
            let end = written + n;
            while written < end {
                let start = state.w & mask;
                let chunk = (end - written).min(state.storage.len() - start);
                state.storage[start..start + chunk].copy_from_slice(&buf[written..written + chunk]);
                state.w = state.w.wrapping_add(chunk);
                written += chunk;
            }
        }
        Ok(written)
    }

    /// Moves the deadline of reads blocked right now.
    pub fn reset_read_deadline(&self, deadline: Deadline) {
        self.core.reset_deadline(Side::Read, deadline);
    }

    /// Moves the deadline of writes blocked right now, including the chunks
    /// they have yet to write.
    pub fn reset_write_deadline(&self, deadline: Deadline) {
        self.core.reset_deadline(Side::Write, deadline);
    }

    /// Reads currently waiting for data.
    pub fn blocked_readers(&self) -> usize {
        self.core.blocked(Side::Read)
    }

    /// Writes currently waiting for space.
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

    pub fn timekeeper(&self) -> &Timekeeper {
        self.core.timekeeper()
    }
}

impl fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByteQueue").field(&self.core).finish()
    }
}
