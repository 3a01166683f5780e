//! Monotonic nanosecond clocks used by capture-side accumulators.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic ticks in nanoseconds
pub trait Ticker: Send + Sync {
    fn read(&self) -> i64;
}

/// Ticker backed by `Instant`, anchored at construction
#[derive(Debug, Clone)]
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn read(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Manually advanced ticker for tests and replays
#[derive(Debug, Clone, Default)]
pub struct FakeTicker {
    now: Arc<AtomicI64>,
}

impl FakeTicker {
    pub fn new(start: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(start)) }
    }

    pub fn set(&self, tick: i64) {
        self.now.store(tick, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: i64) {
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Ticker for FakeTicker {
    fn read(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
