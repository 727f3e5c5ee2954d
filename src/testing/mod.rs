//! Test support
//!
//! Mock collaborators for exercising session and scheduler behavior without
//! a broker or a display.

pub mod mocks;
