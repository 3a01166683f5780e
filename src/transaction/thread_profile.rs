use tracing::debug;

use crate::aggregate::MutableProfile;
use crate::common::constants::UNMERGED_SAMPLE_THRESHOLD;
use crate::model::{ProfileMessage, StackFrame, ThreadState};

/// Stack samples of one transaction.
///
/// Samples are buffered and merged into the tree in batches; past the sample
/// limit they are dropped and the profile is flagged.
#[derive(Debug, Clone)]
pub struct ThreadProfile {
    unmerged: Vec<(Vec<StackFrame>, ThreadState)>,
    profile: MutableProfile,
    sample_count: usize,
    sample_limit: usize,
}

impl ThreadProfile {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            unmerged: Vec::new(),
            profile: MutableProfile::new(),
            sample_count: 0,
            sample_limit,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn is_sample_limit_exceeded(&self) -> bool {
        self.profile.sample_limit_exceeded()
    }

    /// `stack_trace` is innermost frame first
    pub fn add_stack_trace(&mut self, stack_trace: Vec<StackFrame>, thread_state: ThreadState) {
        if self.sample_count >= self.sample_limit {
            if !self.profile.sample_limit_exceeded() {
                debug!("🧵 Profile sample limit {} reached", self.sample_limit);
                self.profile.set_sample_limit_exceeded();
            }
            return;
        }
        self.sample_count += 1;
        self.unmerged.push((stack_trace, thread_state));
        if self.unmerged.len() >= UNMERGED_SAMPLE_THRESHOLD {
            self.merge_unmerged();
        }
    }

    pub fn to_message(&mut self) -> ProfileMessage {
        self.merge_unmerged();
        self.profile.to_message()
    }

    /// Fold this transaction's samples into an aggregation window's profile
    pub fn merge_into(&mut self, target: &mut MutableProfile) {
        self.merge_unmerged();
        target.merge_profile(&self.profile);
    }

    fn merge_unmerged(&mut self) {
        for (stack_trace, thread_state) in self.unmerged.drain(..) {
            self.profile.merge_stack_trace(&stack_trace, thread_state);
        }
    }
}
