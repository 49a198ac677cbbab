//! The two buffering disciplines used by the frame tasks.
//!
//! - `mailbox`: latest-value slots on the reception side
//! - `flow_control`: software buffer in front of bounded hardware stages on
//!   the transmission side

pub mod flow_control;
pub mod mailbox;

pub use flow_control::{FlowControlledQueue, Submission};
pub use mailbox::{BufferedFrame, BufferedMailbox, WriteOutcome};
