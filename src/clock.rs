use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A source of absolute time for deadline checks.
///
/// Deadlines handed to the queues are absolute nanoseconds since the UNIX
/// epoch, so every clock must report on that same scale.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current timestamp in nanoseconds since the UNIX epoch.
    fn now(&self) -> u64;

    /// Returns the current time split into `(seconds, nanoseconds)`.
    fn now_parts(&self) -> (u64, u32) {
        let now = self.now();
        (now / NANOS_PER_SEC, (now % NANOS_PER_SEC) as u32)
    }
}

/// Wall clock via `SystemTime`. Subject to NTP steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        wall_clock_ns()
    }
}

/// TSC-backed clock (`quanta`), anchored once to the wall clock.
///
/// Monotonic after construction, which keeps armed deadlines from firing early
/// when NTP steps the system time backwards.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    tsc: quanta::Clock,
    anchor_ns: u64,
    anchor: quanta::Instant,
}

impl QuantaClock {
    pub fn new() -> Self {
        let tsc = quanta::Clock::new();
        let anchor = tsc.now();
        Self {
            tsc,
            anchor_ns: wall_clock_ns(),
            anchor,
        }
    }
}

impl Default for QuantaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> u64 {
        let elapsed = self.tsc.now().duration_since(self.anchor);
        self.anchor_ns
            .saturating_add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// A clock that only moves when told to. Pair it with
/// [`ManualTimerService`](crate::timer::ManualTimerService) for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ns),
        }
    }

    pub fn set(&self, now_ns: u64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ns: u64) -> u64 {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst) + delta_ns
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

fn wall_clock_ns() -> u64 {
    // A wall clock before 1970 or past year 2554 saturates instead of failing.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
