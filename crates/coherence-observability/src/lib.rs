//! Structured logging and request correlation for the coherence runtime.
//!
//! This crate provides:
//! - `RequestId` - Correlation id attached to every request span
//! - `init_logging` - Installs the process-wide `tracing` subscriber
//! - `request_span` - Span wrapping the work done for one request

mod logging;
mod request;

pub use logging::*;
pub use request::*;
