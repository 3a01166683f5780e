//! Wire-level messages exchanged between agents, collector nodes and storage.
//!
//! The transport schema itself is external; these structs carry the named
//! fields the collector reads and writes.

pub mod aggregate;
pub mod trace;

pub use aggregate::{
    AggregateMessage, AggregateQuery, AggregateServiceCall, AggregateTimer, SharedQueryText,
    ThreadStatsMessage,
};
pub use trace::{
    ErrorMessageProto, ProfileMessage, ProfileNodeMessage, StackFrame, ThreadState,
    ThrowableMessage, TraceTimer,
};
