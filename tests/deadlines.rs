use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use sockq::clock::Clock;
use sockq::queue::{ByteQueue, Deadline};
use sockq::timer::{ManualTimerService, Timekeeper};

/// Polls until the manual service holds `n` registrations.
fn wait_for_pending(timers: &ManualTimerService, n: usize) {
    wait_until(|| timers.pending() == n);
}

fn wait_until(mut ready: impl FnMut() -> bool) {
    let start = Instant::now();
    while !ready() {
        assert!(start.elapsed() < Duration::from_secs(1), "callers never blocked");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn past_deadline_read_returns_immediately() {
    let q = ByteQueue::new(16).unwrap();
    let (tx, rx) = mpsc::channel();

    let reader = {
        let q = q.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 4];
            let result = q.read(&mut buf, Deadline::at(1));
            tx.send(()).unwrap();
            result
        })
    };

    rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let err = reader.join().unwrap().unwrap_err();
    assert!(err.is_temporarily_unavailable());
    assert_eq!(err.transferred(), 0);
    assert!(q.is_empty());
}

#[test]
fn read_deadline_expires_on_timer_thread() {
    let q = ByteQueue::new(16).unwrap();
    let timeout = Duration::from_millis(50);
    let deadline = Deadline::after(&**q.timekeeper().clock(), timeout);

    let start = Instant::now();
    let err = q.read(&mut [0u8; 4], deadline).unwrap_err();
    assert!(err.is_temporarily_unavailable());
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(q.timekeeper().clock().now() >= deadline.as_nanos());
}

#[test]
fn data_arriving_first_beats_the_deadline() {
    let q = ByteQueue::new(16).unwrap();
    let deadline = Deadline::after(&**q.timekeeper().clock(), Duration::from_secs(5));

    let writer = {
        let q = q.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q.write(b"ok", Deadline::NONE).unwrap();
        })
    };

    let mut buf = [0u8; 4];
    let n = q.read(&mut buf, deadline).unwrap();
    assert_eq!(&buf[..n], b"ok");
    writer.join().unwrap();
}

#[test]
fn manual_expiry_unblocks_reader() {
    let (timekeeper, timers) = Timekeeper::manual(100);
    let q = ByteQueue::with_timekeeper(16, timekeeper).unwrap();

    let reader = {
        let q = q.clone();
        thread::spawn(move || q.read(&mut [0u8; 4], Deadline::at(200)))
    };

    wait_for_pending(&timers, 1);
    assert_eq!(timers.advance(50), 0);
    assert_eq!(timers.advance(100), 1);
    assert!(reader.join().unwrap().unwrap_err().is_temporarily_unavailable());
    assert_eq!(timers.pending(), 0);

    // The queue itself is unaffected by the expiry.
    q.write(b"x", Deadline::NONE).unwrap();
    assert_eq!(q.read(&mut [0u8; 4], Deadline::NONE).unwrap(), 1);
}

#[test]
fn expired_write_reports_partial_progress() {
    let (timekeeper, timers) = Timekeeper::manual(100);
    let q = ByteQueue::with_timekeeper(4, timekeeper).unwrap();

    let writer = {
        let q = q.clone();
        thread::spawn(move || q.write(b"0123456789", Deadline::at(200)))
    };

    let start = Instant::now();
    while q.len() < 4 || timers.pending() != 1 {
        assert!(start.elapsed() < Duration::from_secs(1), "writer never blocked");
        thread::sleep(Duration::from_millis(1));
    }
    timers.advance(150);

    let err = writer.join().unwrap().unwrap_err();
    assert!(err.is_temporarily_unavailable());
    assert_eq!(err.transferred(), 4);

    let mut buf = [0u8; 8];
    let n = q.read(&mut buf, Deadline::NONE).unwrap();
    assert_eq!(&buf[..n], b"0123");
}

#[test]
fn expiry_of_one_reader_leaves_untimed_reader_blocked() {
    let (timekeeper, timers) = Timekeeper::manual(100);
    let q = ByteQueue::with_timekeeper(16, timekeeper).unwrap();
    let (done_tx, done_rx) = mpsc::channel();

    let untimed = {
        let q = q.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 8];
            let result = q.read(&mut buf, Deadline::NONE).map(|n| buf[..n].to_vec());
            let _ = done_tx.send("untimed");
            result
        })
    };
    let timed = {
        let q = q.clone();
        thread::spawn(move || {
            let result = q.read(&mut [0u8; 8], Deadline::at(200));
            let _ = done_tx.send("timed");
            result
        })
    };

    wait_until(|| q.blocked_readers() == 2 && timers.pending() == 1);
    assert_eq!(timers.advance(150), 1);
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(1)).unwrap(), "timed");
    assert!(timed.join().unwrap().unwrap_err().is_temporarily_unavailable());

    assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(q.blocked_readers(), 1);
    q.write(b"data", Deadline::NONE).unwrap();
    assert_eq!(untimed.join().unwrap().unwrap(), b"data");
}

#[test]
fn expiry_of_one_writer_leaves_untimed_writer_blocked() {
    let (timekeeper, timers) = Timekeeper::manual(100);
    let q = ByteQueue::with_timekeeper(2, timekeeper).unwrap();
    q.write(b"ab", Deadline::NONE).unwrap();

    let untimed = {
        let q = q.clone();
        thread::spawn(move || q.write(b"c", Deadline::NONE))
    };
    let timed = {
        let q = q.clone();
        thread::spawn(move || q.write(b"d", Deadline::at(200)))
    };

    wait_until(|| q.blocked_writers() == 2 && timers.pending() == 1);
    timers.advance(150);
    let err = timed.join().unwrap().unwrap_err();
    assert!(err.is_temporarily_unavailable());
    assert_eq!(err.transferred(), 0);
    assert_eq!(q.blocked_writers(), 1);

    let mut buf = [0u8; 1];
    q.read(&mut buf, Deadline::NONE).unwrap();
    assert_eq!(untimed.join().unwrap().unwrap(), 1);
    let mut rest = [0u8; 4];
    let n = q.read(&mut rest, Deadline::NONE).unwrap();
    assert_eq!(&rest[..n], b"bc");
}

#[test]
fn timed_readers_expire_independently() {
    let (timekeeper, timers) = Timekeeper::manual(0);
    let q = ByteQueue::with_timekeeper(16, timekeeper).unwrap();

    let early = {
        let q = q.clone();
        thread::spawn(move || q.read(&mut [0u8; 4], Deadline::at(100)))
    };
    let late = {
        let q = q.clone();
        thread::spawn(move || q.read(&mut [0u8; 4], Deadline::at(300)))
    };

    wait_until(|| q.blocked_readers() == 2 && timers.pending() == 2);
    assert_eq!(timers.advance(150), 1);
    assert!(early.join().unwrap().unwrap_err().is_temporarily_unavailable());
    assert_eq!(q.blocked_readers(), 1);

    assert_eq!(timers.advance(200), 1);
    assert!(late.join().unwrap().unwrap_err().is_temporarily_unavailable());
}
