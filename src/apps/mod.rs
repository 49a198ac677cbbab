//! Application tasks running on the simulated node.
//!
//! - `sink`: reception task with latest-value mailbox semantics
//! - `source`: transmission task with software/hardware flow control
//! - `logical`: periodic compute task reading from the sink and writing to
//!   the source

use embassy_time::Duration;

pub mod logical;
pub mod sink;
pub mod source;

pub use logical::LogicalApp;
pub use sink::SinkApp;
pub use source::SourceApp;

/// Scheduling parameters shared by every application task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskParams {
    /// Higher value wins arbitration.
    pub priority: i64,
    pub period: Duration,
    /// Processor time one activation needs.
    pub execution_time: Duration,
}
