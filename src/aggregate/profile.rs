//! Mergeable profile tree.
//!
//! Nodes live in an arena and refer to their children by index. A stack trace
//! is given innermost frame first and is merged from the outermost frame down.

use crate::model::{ProfileMessage, ProfileNodeMessage, StackFrame, ThreadState};

#[derive(Debug, Clone, PartialEq)]
struct ProfileNode {
    frame: StackFrame,
    sample_count: i64,
    leaf_thread_state: Option<ThreadState>,
    children: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutableProfile {
    nodes: Vec<ProfileNode>,
    roots: Vec<usize>,
    sample_limit_exceeded: bool,
}

impl MutableProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Samples that landed on root frames
    pub fn sample_count(&self) -> i64 {
        self.roots.iter().map(|&root| self.nodes[root].sample_count).sum()
    }

    pub fn sample_limit_exceeded(&self) -> bool {
        self.sample_limit_exceeded
    }

    pub fn set_sample_limit_exceeded(&mut self) {
        self.sample_limit_exceeded = true;
    }

    pub fn merge_stack_trace(&mut self, stack_trace: &[StackFrame], thread_state: ThreadState) {
        let mut parent = None;
        let depth = stack_trace.len();
        for (position, frame) in stack_trace.iter().rev().enumerate() {
            let index = self.child_for(parent, frame);
            let node = &mut self.nodes[index];
            node.sample_count += 1;
            if position + 1 == depth {
                node.leaf_thread_state = Some(thread_state);
            }
            parent = Some(index);
        }
    }

    /// Fold a flattened pre-order profile into this tree
    pub fn merge(&mut self, profile: &ProfileMessage) {
        let mut path: Vec<usize> = Vec::new();
        for message in &profile.nodes {
            let depth = message.depth as usize;
            if depth > path.len() {
                // malformed input: a node deeper than its parent chain
                continue;
            }
            path.truncate(depth);
            let parent = path.last().copied();
            let index = self.child_for(parent, &message.frame);
            let node = &mut self.nodes[index];
            node.sample_count += message.sample_count;
            if message.leaf_thread_state.is_some() {
                node.leaf_thread_state = message.leaf_thread_state;
            }
            path.push(index);
        }
        self.sample_limit_exceeded |= profile.sample_limit_exceeded;
    }

    pub fn merge_profile(&mut self, other: &MutableProfile) {
        self.merge(&other.to_message());
    }

    pub fn to_message(&self) -> ProfileMessage {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut pending: Vec<(usize, u32)> = self.roots.iter().rev().map(|&root| (root, 0)).collect();
        while let Some((index, depth)) = pending.pop() {
            let node = &self.nodes[index];
            nodes.push(ProfileNodeMessage {
                depth,
                frame: node.frame.clone(),
                sample_count: node.sample_count,
                leaf_thread_state: node.leaf_thread_state,
            });
            pending.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
        }
        ProfileMessage {
            nodes,
            sample_limit_exceeded: self.sample_limit_exceeded,
        }
    }

    fn child_for(&mut self, parent: Option<usize>, frame: &StackFrame) -> usize {
        let siblings = match parent {
            Some(parent) => &self.nodes[parent].children,
            None => &self.roots,
        };
        if let Some(&existing) = siblings.iter().find(|&&index| self.nodes[index].frame == *frame) {
            return existing;
        }
        let index = self.nodes.len();
        self.nodes.push(ProfileNode {
            frame: frame.clone(),
            sample_count: 0,
            leaf_thread_state: None,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        index
    }
}
