//! This module exports a minimal point-to-point message-passing API, which
//! is encapsulated by a `Communicator` trait. Messages are byte buffers,
//! matched on the receiving side by source rank and tag. Two transports are
//! included: crossbeam channels between threads of one process, and a
//! pure-Rust TCP transport between processes.
//!

mod backoff;
pub mod channel;
pub mod comm;
mod mailbox;
pub mod tcp;
pub mod util;

pub use comm::{Communicator, Envelope, Tag};
