//! Error capture with bounded stack traces.
//!
//! Each level of a causal chain keeps only the frames it does not share with
//! the level enclosing it. All levels of one transaction draw from a single
//! `FrameBudget`; once it runs dry a placeholder frame marks the cut. Chains
//! deeper than `MAX_CAUSE_DEPTH` end in a placeholder cause.

use std::error::Error;

use tracing::debug;

use crate::common::constants::{
    CAUSE_CHAIN_TRUNCATED_MESSAGE, FRAME_LIMIT_EXCEEDED_MESSAGE, MAX_CAUSE_DEPTH,
};
use crate::model::{ErrorMessageProto, StackFrame, ThrowableMessage};

/// A captured exception; stack traces are innermost frame first
pub trait ThrowableSource {
    fn class_name(&self) -> &str;
    fn message(&self) -> Option<&str>;
    fn stack_trace(&self) -> &[StackFrame];
    fn cause(&self) -> Option<&dyn ThrowableSource>;
    fn suppressed(&self) -> Vec<&dyn ThrowableSource> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedThrowable {
    pub class_name: String,
    pub message: Option<String>,
    pub stack_trace: Vec<StackFrame>,
    pub cause: Option<Box<CapturedThrowable>>,
    pub suppressed: Vec<CapturedThrowable>,
}

impl CapturedThrowable {
    pub fn new(class_name: &str, message: Option<&str>) -> Self {
        Self {
            class_name: class_name.to_string(),
            message: message.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<StackFrame>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    pub fn with_cause(mut self, cause: CapturedThrowable) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_suppressed(mut self, suppressed: CapturedThrowable) -> Self {
        self.suppressed.push(suppressed);
        self
    }

    /// Walk a `std::error::Error` source chain. Rust errors carry no frames,
    /// only the outermost level knows its concrete type.
    pub fn from_error<E: Error + 'static>(error: &E) -> Self {
        let mut sources = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            if sources.len() > MAX_CAUSE_DEPTH {
                break;
            }
            sources.push(source.to_string());
            current = source.source();
        }
        let mut cause = None;
        for message in sources.into_iter().rev() {
            let mut level = CapturedThrowable::new("error source", Some(&message));
            level.cause = cause.map(Box::new);
            cause = Some(level);
        }
        let mut root = CapturedThrowable::new(std::any::type_name::<E>(), Some(&error.to_string()));
        root.cause = cause.map(Box::new);
        root
    }
}

impl ThrowableSource for CapturedThrowable {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn stack_trace(&self) -> &[StackFrame] {
        &self.stack_trace
    }

    fn cause(&self) -> Option<&dyn ThrowableSource> {
        self.cause.as_deref().map(|cause| cause as &dyn ThrowableSource)
    }

    fn suppressed(&self) -> Vec<&dyn ThrowableSource> {
        self.suppressed
            .iter()
            .map(|suppressed| suppressed as &dyn ThrowableSource)
            .collect()
    }
}

/// Frames still available to one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudget {
    limit: usize,
    used: usize,
}

impl FrameBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    fn take(&mut self, wanted: usize) -> usize {
        let granted = wanted.min(self.remaining());
        self.used += granted;
        granted
    }
}

pub struct ErrorMessage;

impl ErrorMessage {
    /// Build the error message of a transaction. An empty `message` falls
    /// back to the throwable's own description.
    pub fn create(
        message: &str,
        throwable: Option<&dyn ThrowableSource>,
        budget: &mut FrameBudget,
    ) -> ErrorMessageProto {
        let message = match throwable {
            Some(throwable) if message.is_empty() => describe(throwable),
            _ => message.to_string(),
        };
        ErrorMessageProto {
            message,
            throwable: throwable.map(|throwable| Self::throwable_message(throwable, None, budget, 0)),
        }
    }

    fn throwable_message(
        throwable: &dyn ThrowableSource,
        enclosing: Option<&[StackFrame]>,
        budget: &mut FrameBudget,
        depth: usize,
    ) -> ThrowableMessage {
        let full_trace = throwable.stack_trace();
        let in_common = enclosing
            .map(|enclosing| frames_in_common(full_trace, enclosing))
            .unwrap_or(0);
        let unique = &full_trace[..full_trace.len() - in_common];

        let granted = budget.take(unique.len());
        let mut stack_trace = unique[..granted].to_vec();
        if granted < unique.len() {
            debug!(
                "🧱 Throwable frame limit reached, dropped {} frames of {}",
                unique.len() - granted,
                throwable.class_name()
            );
            stack_trace.push(StackFrame::placeholder(FRAME_LIMIT_EXCEEDED_MESSAGE));
        }

        let cause = throwable.cause().map(|cause| {
            if depth + 1 >= MAX_CAUSE_DEPTH {
                Box::new(truncated_cause())
            } else {
                Box::new(Self::throwable_message(cause, Some(full_trace), budget, depth + 1))
            }
        });
        let suppressed = if depth + 1 >= MAX_CAUSE_DEPTH {
            Vec::new()
        } else {
            throwable
                .suppressed()
                .into_iter()
                .map(|suppressed| Self::throwable_message(suppressed, Some(full_trace), budget, depth + 1))
                .collect()
        };

        ThrowableMessage {
            class_name: throwable.class_name().to_string(),
            message: throwable.message().map(str::to_string),
            stack_trace,
            frames_in_common_with_enclosing: in_common,
            cause,
            suppressed,
        }
    }
}

fn describe(throwable: &dyn ThrowableSource) -> String {
    match throwable.message() {
        Some(message) => format!("{}: {}", throwable.class_name(), message),
        None => throwable.class_name().to_string(),
    }
}

fn truncated_cause() -> ThrowableMessage {
    ThrowableMessage {
        class_name: String::new(),
        message: Some(CAUSE_CHAIN_TRUNCATED_MESSAGE.to_string()),
        stack_trace: Vec::new(),
        frames_in_common_with_enclosing: 0,
        cause: None,
        suppressed: Vec::new(),
    }
}

/// Length of the outermost run shared by both traces
fn frames_in_common(stack_trace: &[StackFrame], enclosing: &[StackFrame]) -> usize {
    stack_trace
        .iter()
        .rev()
        .zip(enclosing.iter().rev())
        .take_while(|(frame, enclosing_frame)| frame == enclosing_frame)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(method: &str) -> StackFrame {
        StackFrame::new("com.example.Service", method, Some("Service.java"), 10)
    }

    fn chain(levels: usize) -> CapturedThrowable {
        let mut throwable = CapturedThrowable::new("Level", Some("level 84"))
            .with_stack_trace(vec![frame("inner"), frame("main")]);
        for level in (0..levels - 1).rev() {
            throwable = CapturedThrowable::new("Level", Some(&format!("level {}", level)))
                .with_stack_trace(vec![frame("outer"), frame("main")])
                .with_cause(throwable);
        }
        throwable
    }

    #[test]
    fn test_common_frames_stripped_from_cause() {
        let root = CapturedThrowable::new("WrapperException", Some("wrapped"))
            .with_stack_trace(vec![frame("wrap"), frame("handle"), frame("main")])
            .with_cause(
                CapturedThrowable::new("IoException", Some("disk"))
                    .with_stack_trace(vec![frame("read"), frame("load"), frame("handle"), frame("main")]),
            );
        let mut budget = FrameBudget::new(100);

        let proto = ErrorMessage::create("", Some(&root), &mut budget);
        assert_eq!(proto.message, "WrapperException: wrapped");
        let throwable = proto.throwable.unwrap();
        assert_eq!(throwable.frames_in_common_with_enclosing, 0);
        assert_eq!(throwable.stack_trace.len(), 3);
        let cause = throwable.cause.unwrap();
        assert_eq!(cause.frames_in_common_with_enclosing, 2);
        assert_eq!(cause.stack_trace, vec![frame("read"), frame("load")]);
        assert_eq!(budget.used(), 5);
    }

    #[test]
    fn test_frame_budget_truncates_with_placeholder() {
        let root = CapturedThrowable::new("E", None)
            .with_stack_trace((0..5).map(|i| frame(&format!("m{}", i))).collect());
        let mut budget = FrameBudget::new(3);

        let throwable = ErrorMessage::create("boom", Some(&root), &mut budget).throwable.unwrap();
        assert_eq!(throwable.stack_trace.len(), 4);
        assert_eq!(throwable.stack_trace[3].class_name, FRAME_LIMIT_EXCEEDED_MESSAGE);
        assert!(budget.is_exhausted());

        // a later error in the same transaction keeps only the placeholder
        let second = ErrorMessage::create("again", Some(&root), &mut budget).throwable.unwrap();
        assert_eq!(second.stack_trace, vec![StackFrame::placeholder(FRAME_LIMIT_EXCEEDED_MESSAGE)]);
    }

    #[test]
    fn test_deep_cause_chain_collapsed() {
        let root = chain(85);
        assert_eq!(root.stack_trace.len(), 2);
        let mut budget = FrameBudget::new(100_000);

        let throwable = ErrorMessage::create("deep", Some(&root), &mut budget).throwable.unwrap();
        assert_eq!(throwable.chain_depth(), MAX_CAUSE_DEPTH + 1);

        let mut current = &throwable;
        for _ in 0..MAX_CAUSE_DEPTH - 1 {
            assert_eq!(current.class_name, "Level");
            current = current.cause.as_deref().unwrap();
        }
        assert_eq!(current.message.as_deref(), Some("level 79"));
        let placeholder = current.cause.as_deref().unwrap();
        assert_eq!(placeholder.message.as_deref(), Some(CAUSE_CHAIN_TRUNCATED_MESSAGE));
        assert!(placeholder.cause.is_none());
    }

    #[test]
    fn test_short_chain_kept_whole() {
        let root = chain(3);
        let mut budget = FrameBudget::new(100);
        let throwable = ErrorMessage::create("short", Some(&root), &mut budget).throwable.unwrap();
        assert_eq!(throwable.chain_depth(), 3);
    }

    #[test]
    fn test_suppressed_share_enclosing_frames() {
        let root = CapturedThrowable::new("Primary", None)
            .with_stack_trace(vec![frame("close"), frame("main")])
            .with_suppressed(
                CapturedThrowable::new("Secondary", None).with_stack_trace(vec![frame("flush"), frame("main")]),
            );
        let mut budget = FrameBudget::new(100);
        let throwable = ErrorMessage::create("x", Some(&root), &mut budget).throwable.unwrap();
        assert_eq!(throwable.suppressed.len(), 1);
        assert_eq!(throwable.suppressed[0].frames_in_common_with_enclosing, 1);
    }

    #[test]
    fn test_from_std_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("request failed")]
        struct RequestError(#[source] std::io::Error);

        let error = RequestError(std::io::Error::new(std::io::ErrorKind::Other, "connection reset"));
        let captured = CapturedThrowable::from_error(&error);
        assert!(captured.class_name.ends_with("RequestError"));
        assert_eq!(captured.cause.as_ref().unwrap().message.as_deref(), Some("connection reset"));

        let mut budget = FrameBudget::new(10);
        let proto = ErrorMessage::create("", Some(&captured), &mut budget);
        assert!(proto.message.ends_with("RequestError: request failed"));
        assert_eq!(proto.throwable.unwrap().chain_depth(), 2);
    }
}
