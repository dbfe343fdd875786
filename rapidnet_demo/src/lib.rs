//! Plumbing shared by the echo server and echo client binaries: JSON
//! configuration files and `tracing` subscriber setup.

pub mod config;
pub mod tracing_config;
