//! Thread statistics captured at transaction start and completion.

use crate::aggregate::thread_stats::NOT_AVAILABLE;
use crate::model::ThreadStatsMessage;

/// Raw counters; `-1` marks a counter the platform does not provide
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStatsSnapshot {
    pub cpu_nanos: i64,
    pub blocked_nanos: i64,
    pub waited_nanos: i64,
    pub allocated_bytes: i64,
}

impl ThreadStatsSnapshot {
    pub const NOT_AVAILABLE: ThreadStatsSnapshot = ThreadStatsSnapshot {
        cpu_nanos: -1,
        blocked_nanos: -1,
        waited_nanos: -1,
        allocated_bytes: -1,
    };
}

pub trait ThreadStatsSource: Send + Sync {
    fn snapshot(&self) -> ThreadStatsSnapshot;
}

/// CPU time of the calling OS thread; the other counters are not available.
///
/// Only meaningful while the transaction stays on one thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentThreadStats;

impl ThreadStatsSource for CurrentThreadStats {
    fn snapshot(&self) -> ThreadStatsSnapshot {
        ThreadStatsSnapshot {
            cpu_nanos: thread_cpu_nanos(),
            ..ThreadStatsSnapshot::NOT_AVAILABLE
        }
    }
}

#[cfg(unix)]
fn thread_cpu_nanos() -> i64 {
    let mut time = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `time` is a valid, writable timespec for the duration of the call
    let result = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut time) };
    if result != 0 {
        return -1;
    }
    (time.tv_sec as i64) * 1_000_000_000 + time.tv_nsec as i64
}

#[cfg(not(unix))]
fn thread_cpu_nanos() -> i64 {
    -1
}

fn delta(start: i64, end: i64) -> f64 {
    if start < 0 || end < 0 {
        NOT_AVAILABLE
    } else {
        (end - start) as f64
    }
}

#[derive(Debug, Clone)]
pub struct ThreadStatsComponent {
    start: ThreadStatsSnapshot,
    completed: Option<ThreadStatsSnapshot>,
}

impl ThreadStatsComponent {
    pub fn start(source: &dyn ThreadStatsSource) -> Self {
        Self {
            start: source.snapshot(),
            completed: None,
        }
    }

    pub fn on_complete(&mut self, source: &dyn ThreadStatsSource) {
        if self.completed.is_none() {
            self.completed = Some(source.snapshot());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.is_some()
    }

    /// Totals since start; a running transaction is measured up to now
    pub fn to_message(&self, source: &dyn ThreadStatsSource) -> ThreadStatsMessage {
        let end = self.completed.unwrap_or_else(|| source.snapshot());
        ThreadStatsMessage {
            cpu_nanos: delta(self.start.cpu_nanos, end.cpu_nanos),
            blocked_nanos: delta(self.start.blocked_nanos, end.blocked_nanos),
            waited_nanos: delta(self.start.waited_nanos, end.waited_nanos),
            allocated_bytes: delta(self.start.allocated_bytes, end.allocated_bytes),
        }
    }
}
