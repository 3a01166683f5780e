//! Suppression of duplicate work for the same logical unit.
//!
//! A key admitted by `try_acquire` stays recorded until `release` or until it
//! expires. This is not a lock: holders are never notified, and two callers
//! racing across an expiry can both be admitted.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::common::constants::{RATE_LIMITER_EXPIRY_SECONDS, RATE_LIMITER_MAX_ENTRIES};
use crate::common::{SystemTicker, Ticker};
use crate::metrics::get_metrics;

pub struct RateLimiter<K> {
    name: &'static str,
    acquired: DashMap<K, i64>,
    expiry_nanos: i64,
    max_entries: usize,
    ticker: Arc<dyn Ticker>,
    rejected: AtomicU64,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(name: &'static str) -> Self {
        Self::with_ticker(name, Arc::new(SystemTicker::new()))
    }

    pub fn with_ticker(name: &'static str, ticker: Arc<dyn Ticker>) -> Self {
        Self::with_limits(
            name,
            ticker,
            Duration::from_secs(RATE_LIMITER_EXPIRY_SECONDS),
            RATE_LIMITER_MAX_ENTRIES,
        )
    }

    pub fn with_limits(name: &'static str, ticker: Arc<dyn Ticker>, expiry: Duration, max_entries: usize) -> Self {
        Self {
            name,
            acquired: DashMap::new(),
            expiry_nanos: expiry.as_nanos().min(i64::MAX as u128) as i64,
            max_entries: max_entries.max(1),
            ticker,
            rejected: AtomicU64::new(0),
        }
    }

    /// True the first time `key` is seen since its release or expiry
    pub fn try_acquire(&self, key: K) -> bool {
        let now = self.ticker.read();
        if self.acquired.len() >= self.max_entries {
            self.evict(now);
        }
        let admitted = match self.acquired.entry(key) {
            Entry::Occupied(mut occupied) => {
                if now - *occupied.get() >= self.expiry_nanos {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        };
        if !admitted {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = get_metrics() {
                metrics.record_rate_limited(self.name);
            }
        }
        admitted
    }

    pub fn release(&self, key: &K) {
        self.acquired.remove(key);
    }

    pub fn is_acquired(&self, key: &K) -> bool {
        let now = self.ticker.read();
        self.acquired
            .get(key)
            .map(|acquired_at| now - *acquired_at < self.expiry_nanos)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.acquired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Drop expired keys; when still full, drop the oldest one
    fn evict(&self, now: i64) {
        let expiry_nanos = self.expiry_nanos;
        self.acquired.retain(|_, acquired_at| now - *acquired_at < expiry_nanos);
        if self.acquired.len() < self.max_entries {
            return;
        }
        let oldest = self
            .acquired
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(oldest) = oldest {
            self.acquired.remove(&oldest);
            debug!("🚦 Rate limiter {} full, evicted its oldest key", self.name);
        }
    }
}
