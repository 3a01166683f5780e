use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    pub line_number: i32,
}

impl StackFrame {
    pub fn new(class_name: &str, method_name: &str, file_name: Option<&str>, line_number: i32) -> Self {
        Self {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            file_name: file_name.map(str::to_string),
            line_number,
        }
    }

    /// Placeholder frame carrying only a message in the class slot
    pub fn placeholder(message: &str) -> Self {
        Self::new(message, "", None, 0)
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_name {
            Some(file) if self.line_number > 0 => {
                write!(f, "{}.{}({}:{})", self.class_name, self.method_name, file, self.line_number)
            }
            Some(file) => write!(f, "{}.{}({})", self.class_name, self.method_name, file),
            None => write!(f, "{}.{}(Unknown Source)", self.class_name, self.method_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadState {
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowableMessage {
    pub class_name: String,
    pub message: Option<String>,
    pub stack_trace: Vec<StackFrame>,
    pub frames_in_common_with_enclosing: usize,
    pub cause: Option<Box<ThrowableMessage>>,
    pub suppressed: Vec<ThrowableMessage>,
}

impl ThrowableMessage {
    /// Number of explicit levels in the causal chain, this one included
    pub fn chain_depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self;
        while let Some(cause) = &current.cause {
            depth += 1;
            current = cause;
        }
        depth
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessageProto {
    pub message: String,
    pub throwable: Option<ThrowableMessage>,
}

/// Timer tree node as captured on a single trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTimer {
    pub name: String,
    pub extended: bool,
    pub total_nanos: i64,
    pub count: i64,
    pub active: bool,
    pub child_timers: Vec<TraceTimer>,
}

/// Profile tree node in flattened pre-order form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileNodeMessage {
    pub depth: u32,
    pub frame: StackFrame,
    pub sample_count: i64,
    pub leaf_thread_state: Option<ThreadState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMessage {
    pub nodes: Vec<ProfileNodeMessage>,
    pub sample_limit_exceeded: bool,
}
