//! Per-job directories and the files staged into them.

/// Workspace allocation and teardown.
pub mod manager;
/// Validated, atomic input writes.
pub mod materialize;
