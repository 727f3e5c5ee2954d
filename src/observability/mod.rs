//! Observability support
//!
//! Structured logging configuration for the edge client. Log output is the
//! only observability surface this crate owns; everything else is reported
//! through return codes.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
