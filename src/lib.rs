//! In-memory, deadline-aware queues that emulate blocking socket I/O.
//!
//! A [`ByteQueue`] behaves like one direction of a stream socket, and a
//! [`MessageQueue`] like a datagram socket's receive buffer. Both block on a
//! condition variable and give up at an absolute [`Deadline`] driven by a
//! pluggable [`TimerService`]. [`conn`] wires two byte queues into a connected
//! pair of endpoints.

pub mod addr;
pub mod clock;
pub mod conn;
pub mod error;
pub mod queue;
pub mod timer;

pub use addr::SockAddr;
pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use conn::{pipe, Endpoint, Listener};
pub use error::{Error, Result};
pub use queue::{ByteQueue, Deadline, MessageQueue, QueueConfig, SendError};
pub use timer::{ManualTimerService, ThreadTimerService, Timekeeper, TimerService};
