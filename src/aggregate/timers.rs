//! Mergeable timer trees.
//!
//! Children are matched by (name, extended); a merge that finds no match
//! appends a new child, so sibling order follows first observation.

use crate::model::{AggregateTimer, TraceTimer};

#[derive(Debug, Clone, PartialEq)]
pub struct MutableAggregateTimer {
    name: String,
    extended: bool,
    total_nanos: f64,
    count: i64,
    child_timers: Vec<MutableAggregateTimer>,
}

impl MutableAggregateTimer {
    pub fn new(name: &str, extended: bool) -> Self {
        Self {
            name: name.to_string(),
            extended,
            total_nanos: 0.0,
            count: 0,
            child_timers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn total_nanos(&self) -> f64 {
        self.total_nanos
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn child_timers(&self) -> &[MutableAggregateTimer] {
        &self.child_timers
    }

    pub fn merge(&mut self, timer: &AggregateTimer) {
        self.total_nanos += timer.total_nanos;
        self.count += timer.count;
        for child in &timer.child_timers {
            child_for(&mut self.child_timers, &child.name, child.extended).merge(child);
        }
    }

    /// Fold one trace's timer tree in; active timers count their time so far
    pub fn merge_trace_timer(&mut self, timer: &TraceTimer) {
        self.total_nanos += timer.total_nanos as f64;
        self.count += timer.count;
        for child in &timer.child_timers {
            child_for(&mut self.child_timers, &child.name, child.extended).merge_trace_timer(child);
        }
    }

    pub fn to_aggregate_timer(&self) -> AggregateTimer {
        AggregateTimer {
            name: self.name.clone(),
            extended: self.extended,
            total_nanos: self.total_nanos,
            count: self.count,
            child_timers: self
                .child_timers
                .iter()
                .map(MutableAggregateTimer::to_aggregate_timer)
                .collect(),
        }
    }
}

/// Merge a transaction's root timers into the window's root list
pub fn merge_root_timers(roots: &mut Vec<MutableAggregateTimer>, timers: &[AggregateTimer]) {
    for timer in timers {
        child_for(roots, &timer.name, timer.extended).merge(timer);
    }
}

fn child_for<'a>(
    timers: &'a mut Vec<MutableAggregateTimer>,
    name: &str,
    extended: bool,
) -> &'a mut MutableAggregateTimer {
    match timers
        .iter()
        .position(|timer| timer.name == name && timer.extended == extended)
    {
        Some(index) => &mut timers[index],
        None => {
            timers.push(MutableAggregateTimer::new(name, extended));
            let last = timers.len() - 1;
            &mut timers[last]
        }
    }
}

/// Timer tree for a single trace, merged from repeated observations
#[derive(Debug, Clone, PartialEq)]
pub struct MutableTraceTimer {
    name: String,
    extended: bool,
    total_nanos: i64,
    count: i64,
    active: bool,
    child_timers: Vec<MutableTraceTimer>,
}

impl MutableTraceTimer {
    pub fn new(name: &str, extended: bool) -> Self {
        Self {
            name: name.to_string(),
            extended,
            total_nanos: 0,
            count: 0,
            active: false,
            child_timers: Vec::new(),
        }
    }

    pub fn from_trace_timer(timer: &TraceTimer) -> Self {
        let mut mutable = Self::new(&timer.name, timer.extended);
        mutable.merge(timer);
        mutable
    }

    pub fn total_nanos(&self) -> i64 {
        self.total_nanos
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn merge(&mut self, timer: &TraceTimer) {
        self.total_nanos += timer.total_nanos;
        self.count += timer.count;
        self.active |= timer.active;
        for child in &timer.child_timers {
            let index = match self
                .child_timers
                .iter()
                .position(|existing| existing.name == child.name && existing.extended == child.extended)
            {
                Some(index) => index,
                None => {
                    self.child_timers
                        .push(MutableTraceTimer::new(&child.name, child.extended));
                    self.child_timers.len() - 1
                }
            };
            self.child_timers[index].merge(child);
        }
    }

    pub fn to_trace_timer(&self) -> TraceTimer {
        TraceTimer {
            name: self.name.clone(),
            extended: self.extended,
            total_nanos: self.total_nanos,
            count: self.count,
            active: self.active,
            child_timers: self
                .child_timers
                .iter()
                .map(MutableTraceTimer::to_trace_timer)
                .collect(),
        }
    }

    pub fn to_aggregate_timer(&self) -> AggregateTimer {
        AggregateTimer {
            name: self.name.clone(),
            extended: self.extended,
            total_nanos: self.total_nanos as f64,
            count: self.count,
            child_timers: self
                .child_timers
                .iter()
                .map(MutableTraceTimer::to_aggregate_timer)
                .collect(),
        }
    }
}
