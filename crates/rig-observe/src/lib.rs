//! Process-wide `tracing` subscriber setup for the agent binaries.
//!
//! Library crates only emit `tracing` events; the binary picks one output format here:
//! human-readable text, JSON lines, or the systemd journal.
mod logger;
pub use logger::*;
