//! # vigil-core
//!
//! Foundation utilities shared by the vigil crates:
//!
//! - **Logging**: [`logging::init_subscriber`] installs the process-wide
//!   `tracing` subscriber (compact, stderr, `RUST_LOG`-aware).
//! - **Log capture**: [`logging::capture_logs`] records events in memory so
//!   tests can assert on what a component emitted (e.g. traced SQL).

#![deny(unsafe_code)]

pub mod logging;
