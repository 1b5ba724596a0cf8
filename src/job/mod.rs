/// Cooperative cancellation.
pub mod cancel;
/// JSON job manifests.
pub mod manifest;
/// Job state machine and execution.
pub mod orchestrator;
/// Job and stage descriptions.
pub mod spec;
