#![forbid(unsafe_code)]

//! Fixtures shared by the dispatch-core integration tests.
//!
//! - [`logging`]: one-call `tracing` setup that writes through the test
//!   harness and honours `RUST_LOG`.
//! - [`listener`]: recording listeners and small host types that declare
//!   events and properties.

pub mod listener;
pub mod logging;

pub use listener::{Counter, Record, Recorder, Sender};
pub use logging::init_tracing;
