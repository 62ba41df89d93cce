use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use sockq::clock::{Clock, QuantaClock, SystemClock};
use sockq::queue::{ByteQueue, Deadline, QueueConfig};
use sockq::timer::{ThreadTimerService, Timekeeper};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ClockKind {
    System,
    Quanta,
}

#[derive(Parser)]
#[command(name = "sockq-pump")]
#[command(about = "Pump a byte pattern through a bounded queue and report throughput")]
struct Cli {
    /// Queue capacity in bytes (power of two)
    #[arg(long, default_value_t = 4096)]
    capacity: usize,

    /// Total bytes to move
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    bytes: u64,

    /// Bytes handed to each write call
    #[arg(long, default_value_t = 1500)]
    write_chunk: usize,

    /// Buffer size of each read call
    #[arg(long, default_value_t = 512)]
    read_chunk: usize,

    /// Per-call deadline in milliseconds (default: block forever)
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Time source for deadlines
    #[arg(long, value_enum, default_value_t = ClockKind::System)]
    clock: ClockKind,
}

/// Hands out a fresh deadline for every call.
#[derive(Clone)]
struct Pacer {
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl Pacer {
    fn next(&self) -> Deadline {
        match self.timeout {
            Some(timeout) => Deadline::after(&*self.clock, timeout),
            None => Deadline::NONE,
        }
    }
}

fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if cli.write_chunk == 0 || cli.read_chunk == 0 {
        anyhow::bail!("chunk sizes must be non-zero");
    }

    let clock: Arc<dyn Clock> = match cli.clock {
        ClockKind::System => Arc::new(SystemClock),
        ClockKind::Quanta => Arc::new(QuantaClock::new()),
    };
    let timers = Arc::new(ThreadTimerService::new(Arc::clone(&clock)));
    let timekeeper = Timekeeper::new(Arc::clone(&clock), timers);
    let config = QueueConfig::byte_stream()
        .with_capacity(cli.capacity)
        .with_timekeeper(timekeeper);
    let queue = ByteQueue::with_config(config)
        .with_context(|| format!("invalid capacity {}", cli.capacity))?;
    let pacer = Pacer {
        clock,
        timeout: cli.deadline_ms.map(Duration::from_millis),
    };

    let total = cli.bytes;
    let started = Instant::now();
    let writer = {
        let queue = queue.clone();
        let pacer = pacer.clone();
        let write_chunk = cli.write_chunk;
        thread::spawn(move || -> sockq::Result<u64> {
            let mut chunk = vec![0u8; write_chunk];
            let mut sent = 0u64;
            while sent < total {
                let len = (total - sent).min(write_chunk as u64) as usize;
                for (i, byte) in chunk[..len].iter_mut().enumerate() {
                    *byte = pattern_byte(sent + i as u64);
                }
                let result = queue.write(&chunk[..len], pacer.next());
                if let Err(err) = result {
                    sent += err.transferred() as u64;
                    log::warn!("writer stopped after {sent} bytes: {err}");
                    queue.close();
                    return Err(err);
                }
                sent += len as u64;
            }
            queue.close();
            Ok(sent)
        })
    };

    let mut buf = vec![0u8; cli.read_chunk];
    let mut received = 0u64;
    loop {
        let n = queue
            .read(&mut buf, pacer.next())
            .with_context(|| format!("read failed after {received} bytes"))?;
        if n == 0 {
            break;
        }
        for (i, byte) in buf[..n].iter().enumerate() {
            let offset = received + i as u64;
            if *byte != pattern_byte(offset) {
                anyhow::bail!("corrupt byte at offset {offset}");
            }
        }
        received += n as u64;
    }
    let elapsed = started.elapsed();

    let sent = writer
        .join()
        .map_err(|_| anyhow!("writer thread panicked"))?
        .context("writer failed")?;
    if sent != received {
        anyhow::bail!("sent {sent} bytes but received {received}");
    }

    let mib_per_sec = received as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(1e-9);
    log::info!(
        "capacity={} write_chunk={} read_chunk={}",
        cli.capacity,
        cli.write_chunk,
        cli.read_chunk
    );
    println!("{received} bytes in {elapsed:?} ({mib_per_sec:.1} MiB/s)");
    Ok(())
}
