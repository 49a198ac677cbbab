//! Discrete-event simulation of an RTOS node exchanging frames over buses.
//!
//! A preemptive priority scheduler arbitrates periodic logical tasks, a
//! reception task buffering incoming frames in a mailbox, and a transmission
//! task feeding hardware transmit buffers under flow control.

pub mod apps;
pub mod buffers;
pub mod common;
pub mod error;
pub mod kernel;
pub mod simulation;
