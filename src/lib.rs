//! mediajob runs media conversion jobs against external tools and in-process codecs.
//!
//! A caller (typically an upload endpoint) describes one conversion as a [`JobSpec`]: named input
//! buffers, an ordered list of [`Stage`]s and the outputs it expects back. The [`Orchestrator`]
//! executes it and returns a [`JobResult`] or a classified [`JobFailure`].
//!
//! # Pipeline overview
//!
//! 1. **Validate**: the stage dependency graph is checked before anything touches the disk.
//! 2. **Stage**: a fresh [`Workspace`] is acquired and inputs are materialized into it.
//! 3. **Run**: stages execute strictly in order, either as external tools (literal argument
//!    vectors, never a shell) or as [`LibraryCodec`] calls.
//! 4. **Collect**: declared outputs are read back into memory.
//! 5. **Tear down**: the workspace is removed on every path, including failures and panics.
//!
//! Design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **No shell**: tool arguments are passed to the OS verbatim.
//! - **Disjoint workspaces**: concurrent jobs never share a directory.
//! - **Classified failures**: every failure maps to a stable [`FailureKind`].
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod collect;
mod foundation;
mod invoke;
mod job;
mod workspace;

/// Declarative stage lists for common conversions.
pub mod presets;

pub use collect::collector::{CollectedOutput, ResultCollector, detect_content_type};
pub use foundation::config::PipelineConfig;
pub use foundation::error::{FailureKind, JobFailure, JobOutcome};
pub use foundation::ids::JobId;
pub use invoke::library::{
    CodecInput, CodecRegistry, CopyCodec, ImageCodec, ImageCodecOptions, ImageTarget,
    LibraryCodec, ResizeFilter,
};
pub use invoke::process::{ToolInvocation, ToolInvoker, is_tool_on_path};
pub use job::cancel::CancelToken;
pub use job::manifest::{JobManifest, ManifestInput};
pub use job::orchestrator::{JobResult, JobState, Orchestrator};
pub use job::spec::{InputFile, JobSpec, Stage, StageAction};
pub use workspace::manager::{Workspace, WorkspaceManager};
pub use workspace::materialize::{AllowList, InputMaterializer, validate_file_name};
