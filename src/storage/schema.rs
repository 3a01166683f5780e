//! Compaction clauses appended to `create table` statements.

use crate::common::constants::{
    MAX_TWCS_WINDOWS, MAX_TWCS_WINDOW_HOURS, MIN_TWCS_WINDOWS, TWCS_TOMBSTONE_THRESHOLD,
};

pub const CREATE_TABLE_PREFIX: &str = "create table if not exists ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategy {
    /// Time windowed, for TTL'd time series written once
    TimeWindow { expiration_hours: u32 },
    Leveled,
    SizeTiered,
}

/// Number of windows an expiration period is split into
pub fn twcs_window_count(expiration_hours: u32, window_size_hours: u32) -> u32 {
    expiration_hours.div_ceil(window_size_hours.max(1))
}

/// Window size whose window count lands in 20..=30, or as close to that band
/// as whole hours allow (short expirations cannot reach 20 windows)
pub fn twcs_window_size_hours(expiration_hours: u32) -> u32 {
    if expiration_hours == 0 {
        // no expiration
        return MAX_TWCS_WINDOW_HOURS;
    }
    // smallest size with at most 30 windows; one hour less gives more than 30
    let widest = expiration_hours
        .div_ceil(MAX_TWCS_WINDOWS)
        .clamp(1, MAX_TWCS_WINDOW_HOURS);
    if widest == 1 || twcs_window_count(expiration_hours, widest) >= MIN_TWCS_WINDOWS {
        return widest;
    }
    let below = MIN_TWCS_WINDOWS - twcs_window_count(expiration_hours, widest);
    let above = twcs_window_count(expiration_hours, widest - 1) - MAX_TWCS_WINDOWS;
    if above < below {
        widest - 1
    } else {
        widest
    }
}

pub fn twcs_compaction_clause(expiration_hours: u32) -> String {
    format!(
        "compaction = {{ 'class' : 'TimeWindowCompactionStrategy', 'compaction_window_unit' : 'HOURS', \
         'compaction_window_size' : '{}', 'unchecked_tombstone_compaction' : true, \
         'tombstone_threshold' : {} }}",
        twcs_window_size_hours(expiration_hours),
        TWCS_TOMBSTONE_THRESHOLD
    )
}

pub fn compaction_clause(strategy: CompactionStrategy) -> String {
    match strategy {
        CompactionStrategy::TimeWindow { expiration_hours } => twcs_compaction_clause(expiration_hours),
        CompactionStrategy::Leveled => {
            "compaction = { 'class' : 'LeveledCompactionStrategy' }".to_string()
        }
        CompactionStrategy::SizeTiered => {
            "compaction = { 'class' : 'SizeTieredCompactionStrategy' }".to_string()
        }
    }
}

/// Full `create table` text with compaction and gc grace options appended
pub fn create_table_query(
    create_table_query: &str,
    strategy: CompactionStrategy,
    gc_grace_seconds: u64,
) -> String {
    let joiner = if create_table_query.to_ascii_lowercase().contains(" with ") {
        "and"
    } else {
        "with"
    };
    format!(
        "{} {} {} and gc_grace_seconds = {}",
        create_table_query.trim_end(),
        joiner,
        compaction_clause(strategy),
        gc_grace_seconds
    )
}

pub fn is_guarded_create_table(query: &str) -> bool {
    query.to_ascii_lowercase().starts_with(CREATE_TABLE_PREFIX)
}
