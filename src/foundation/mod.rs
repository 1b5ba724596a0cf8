/// Pipeline limits and their JSON form.
pub mod config;
/// Failure taxonomy.
pub mod error;
/// Job identifiers.
pub mod ids;
