//! Named latency timers shared between the control and audio threads
//!
//! Every timer is a handful of atomics, so `start`/`stop` are safe to call
//! from the audio callback. A timer is armed by `start` and disarmed by the
//! next `stop`, which folds the elapsed time into the running statistics.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Record command accepted until the engine starts writing the track.
    RecordStartDelay,
    /// Time spent in one mixdown/record pass.
    PlayRecordDelay,
    /// Interval between consecutive process calls.
    ProcessToProcessTime,
    /// Stop command accepted until the engine finalizes the recording.
    RecordStopDelay,
    /// Decode, transition and reply for one serial frame.
    UartProcessTime,
}

impl TimerKind {
    pub const COUNT: usize = 5;

    pub const ALL: [TimerKind; Self::COUNT] = [
        TimerKind::RecordStartDelay,
        TimerKind::PlayRecordDelay,
        TimerKind::ProcessToProcessTime,
        TimerKind::RecordStopDelay,
        TimerKind::UartProcessTime,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            TimerKind::RecordStartDelay => "RecordStartDelay",
            TimerKind::PlayRecordDelay => "PlayRecordDelay",
            TimerKind::ProcessToProcessTime => "ProcessToProcessTime",
            TimerKind::RecordStopDelay => "RecordStopDelay",
            TimerKind::UartProcessTime => "UartProcessTime",
        }
    }
}

#[derive(Debug)]
struct TimerSlot {
    // Nanoseconds since epoch plus one; zero means disarmed.
    started_at: AtomicU64,
    count: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl TimerSlot {
    fn new() -> Self {
        Self {
            started_at: AtomicU64::new(0),
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, elapsed_ns: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.min_ns.fetch_min(elapsed_ns, Ordering::Relaxed);
        self.max_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.started_at.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.total_ns.store(0, Ordering::Relaxed);
        self.min_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
    }
}

/// Accumulated statistics for one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSummary {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimerSummary {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64)
        }
    }
}

#[derive(Debug)]
pub struct Timers {
    epoch: Instant,
    slots: [TimerSlot; TimerKind::COUNT],
}

impl Timers {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            slots: std::array::from_fn(|_| TimerSlot::new()),
        }
    }

    fn now_stamp(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64 + 1
    }

    pub fn start(&self, kind: TimerKind) {
        let stamp = self.now_stamp();
        self.slots[kind.index()]
            .started_at
            .store(stamp, Ordering::Release);
    }

    /// Stop an armed timer. A stop without a matching start is ignored.
    pub fn stop(&self, kind: TimerKind) {
        let slot = &self.slots[kind.index()];
        let started = slot.started_at.swap(0, Ordering::AcqRel);
        if started == 0 {
            return;
        }
        slot.record(self.now_stamp().saturating_sub(started));
    }

    pub fn start_index(&self, index: usize) {
        if let Some(kind) = TimerKind::from_index(index) {
            self.start(kind);
        }
    }

    pub fn stop_index(&self, index: usize) {
        if let Some(kind) = TimerKind::from_index(index) {
            self.stop(kind);
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].started_at.load(Ordering::Acquire) != 0
    }

    pub fn summary(&self, kind: TimerKind) -> TimerSummary {
        let slot = &self.slots[kind.index()];
        let count = slot.count.load(Ordering::Relaxed);
        let min_ns = slot.min_ns.load(Ordering::Relaxed);
        TimerSummary {
            count,
            total: Duration::from_nanos(slot.total_ns.load(Ordering::Relaxed)),
            min: if count == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(min_ns)
            },
            max: Duration::from_nanos(slot.max_ns.load(Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        for slot in &self.slots {
            slot.reset();
        }
    }

    /// Human-readable summary of every timer, one line each.
    pub fn report(&self) -> String {
        let mut out = String::from("Timer report (microseconds)\n");
        for kind in TimerKind::ALL {
            let summary = self.summary(kind);
            let _ = writeln!(
                out,
                "  {:<22} count={:<8} mean={:<10.1} min={:<10.1} max={:.1}",
                kind.name(),
                summary.count,
                summary.mean().as_secs_f64() * 1e6,
                summary.min.as_secs_f64() * 1e6,
                summary.max.as_secs_f64() * 1e6,
            );
        }
        out
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}
