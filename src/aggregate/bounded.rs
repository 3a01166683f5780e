//! Bounded-cardinality (type, text) table shared by the query and service call
//! collectors.
//!
//! While building, at most `limit * hard_limit_multiplier_while_building`
//! distinct keys are admitted across all types; later keys fold into a
//! per-type limit exceeded bucket. Finalization trims the table down to
//! `limit` entries on a copy of the buckets, then re-sorts because a grown
//! bucket can outrank kept entries.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;

/// Entry that can be ranked and folded into an overflow bucket
pub trait BucketEntry: Clone + Default {
    fn total_duration_nanos(&self) -> f64;
    fn add_entry(&mut self, other: &Self);
}

/// Where a finalized entry's text comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryText {
    Named(String),
    LimitExceededBucket,
}

#[derive(Debug, Clone)]
pub struct RankedEntry<E> {
    pub entry_type: String,
    pub text: EntryText,
    pub entry: E,
}

impl<E: BucketEntry> RankedEntry<E> {
    pub fn is_limit_exceeded_bucket(&self) -> bool {
        self.text == EntryText::LimitExceededBucket
    }
}

/// Duration descending; ties put buckets first, then type and text ascending
pub fn compare_ranked<E: BucketEntry>(left: &RankedEntry<E>, right: &RankedEntry<E>) -> Ordering {
    right
        .entry
        .total_duration_nanos()
        .total_cmp(&left.entry.total_duration_nanos())
        .then_with(|| right.is_limit_exceeded_bucket().cmp(&left.is_limit_exceeded_bucket()))
        .then_with(|| left.entry_type.cmp(&right.entry_type))
        .then_with(|| match (&left.text, &right.text) {
            (EntryText::Named(l), EntryText::Named(r)) => l.cmp(r),
            _ => Ordering::Equal,
        })
}

#[derive(Debug, Clone)]
pub struct BoundedTable<E> {
    // first key is type, second key is text
    entries: FxHashMap<String, FxHashMap<String, E>>,
    limit_exceeded_buckets: FxHashMap<String, E>,
    limit: usize,
    hard_limit_multiplier_while_building: usize,
    entry_count: usize,
}

impl<E: BucketEntry> BoundedTable<E> {
    pub fn new(limit: usize, hard_limit_multiplier_while_building: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            limit_exceeded_buckets: FxHashMap::default(),
            limit,
            hard_limit_multiplier_while_building,
            entry_count: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of distinct named entries, across all types
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn hard_limit(&self) -> usize {
        self.limit.saturating_mul(self.hard_limit_multiplier_while_building)
    }

    /// Entry to merge into for (type, text); the type's bucket once the hard limit is hit
    pub fn entry_mut(&mut self, entry_type: &str, text: &str) -> (&mut E, bool) {
        let hard_limit = self.hard_limit();
        let admit = self
            .entries
            .get(entry_type)
            .map(|for_type| for_type.contains_key(text))
            .unwrap_or(false)
            || self.entry_count < hard_limit;
        if !admit {
            return (self.bucket_mut(entry_type), false);
        }
        let for_type = self.entries.entry(entry_type.to_string()).or_default();
        if !for_type.contains_key(text) {
            self.entry_count += 1;
        }
        (for_type.entry(text.to_string()).or_default(), true)
    }

    pub fn bucket_mut(&mut self, entry_type: &str) -> &mut E {
        self.limit_exceeded_buckets
            .entry(entry_type.to_string())
            .or_default()
    }

    pub fn get(&self, entry_type: &str, text: &str) -> Option<&E> {
        self.entries.get(entry_type).and_then(|for_type| for_type.get(text))
    }

    pub fn limit_exceeded_bucket(&self, entry_type: &str) -> Option<&E> {
        self.limit_exceeded_buckets.get(entry_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &E)> {
        self.entries.iter().flat_map(|(entry_type, for_type)| {
            for_type
                .iter()
                .map(move |(text, entry)| (entry_type.as_str(), text.as_str(), entry))
        })
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&str, &E)> {
        self.limit_exceeded_buckets
            .iter()
            .map(|(entry_type, entry)| (entry_type.as_str(), entry))
    }

    /// Ranked output limited to `limit` named entries plus per-type buckets
    pub fn finalize(&self) -> Vec<RankedEntry<E>> {
        // " + 1" covers a limit exceeded bucket
        let mut all = Vec::with_capacity(self.entry_count.min(self.limit) + 1);
        for (entry_type, text, entry) in self.iter() {
            all.push(RankedEntry {
                entry_type: entry_type.to_string(),
                text: EntryText::Named(text.to_string()),
                entry: entry.clone(),
            });
        }
        if all.len() <= self.limit {
            // buckets can already exist when the hard limit multiplier is 1
            all.extend(self.buckets().map(|(entry_type, entry)| RankedEntry {
                entry_type: entry_type.to_string(),
                text: EntryText::LimitExceededBucket,
                entry: entry.clone(),
            }));
            all.sort_by(compare_ranked);
            return all;
        }
        all.sort_by(compare_ranked);
        let exceeded = all.split_off(self.limit);
        // folding into a copy leaves the collector's own buckets untouched
        let mut buckets = self.limit_exceeded_buckets.clone();
        for ranked in exceeded {
            buckets
                .entry(ranked.entry_type)
                .or_default()
                .add_entry(&ranked.entry);
        }
        all.extend(buckets.into_iter().map(|(entry_type, entry)| RankedEntry {
            entry_type,
            text: EntryText::LimitExceededBucket,
            entry,
        }));
        all.sort_by(compare_ranked);
        all
    }
}
