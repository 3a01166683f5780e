use crate::model::ThreadStatsMessage;

/// Marker for a stat the source could not measure
pub const NOT_AVAILABLE: f64 = -1.0;

/// Sum where "not available" on either side wins
pub fn not_available_aware_add(left: f64, right: f64) -> f64 {
    if left == NOT_AVAILABLE || right == NOT_AVAILABLE {
        NOT_AVAILABLE
    } else {
        left + right
    }
}

/// Thread stats merged across the transactions of one aggregation window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutableThreadStats {
    cpu_nanos: f64,
    blocked_nanos: f64,
    waited_nanos: f64,
    allocated_bytes: f64,
    empty: bool,
}

impl MutableThreadStats {
    pub fn new() -> Self {
        Self {
            empty: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn merge(&mut self, stats: &ThreadStatsMessage) {
        self.cpu_nanos = not_available_aware_add(self.cpu_nanos, stats.cpu_nanos);
        self.blocked_nanos = not_available_aware_add(self.blocked_nanos, stats.blocked_nanos);
        self.waited_nanos = not_available_aware_add(self.waited_nanos, stats.waited_nanos);
        self.allocated_bytes = not_available_aware_add(self.allocated_bytes, stats.allocated_bytes);
        self.empty = false;
    }

    pub fn to_message(&self) -> Option<ThreadStatsMessage> {
        if self.empty {
            return None;
        }
        Some(ThreadStatsMessage {
            cpu_nanos: self.cpu_nanos,
            blocked_nanos: self.blocked_nanos,
            waited_nanos: self.waited_nanos,
            allocated_bytes: self.allocated_bytes,
        })
    }
}
