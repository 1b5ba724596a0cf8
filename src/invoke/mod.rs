//! Executors for stage actions.
//!
//! External tools run as child processes; library codecs run in-process on buffers.

/// In-process codecs.
pub mod library;
/// External process execution.
pub mod process;
