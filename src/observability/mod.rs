//! Observability subsystem.
//!
//! Diagnostics go through `tracing` to stderr. The access log written by
//! the logger stages goes to stdout and is not a tracing sink.

pub mod logging;

pub use logging::init_tracing;
