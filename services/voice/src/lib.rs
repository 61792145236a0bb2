//! Voice Service Library Crate
//!
//! Configuration loading and session wiring for the `voice` command-line
//! client. The binary is a thin wrapper around this library.

pub mod config;
pub mod session;
