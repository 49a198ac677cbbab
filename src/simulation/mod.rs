//! Discrete-event simulation core.
//!
//! ## Module Organization
//!
//! - `types`: Bus and frame identities, frames and the message vocabulary
//! - `engine`: Event queue, component trait and timer handling
//! - `observer`: Observer interface and the recording implementation
//! - `transmit`: Hardware transmit buffers and external bus traffic
//! - `bench`: Builds a runnable node from a scenario and reports on a run

pub mod bench;
pub mod engine;
pub mod observer;
pub mod transmit;
pub mod types;

pub use bench::{Bench, Recorders, RunReport};
pub use engine::{Component, ComponentId, Context, Simulation};
pub use types::{BusId, Frame, FrameKey, Message};
