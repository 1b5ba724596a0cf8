use std::time::Duration;

/// Convenience result type used across the pipeline.
pub type JobOutcome<T> = Result<T, JobFailure>;

/// Stable classification of a [`JobFailure`], for callers mapping failures to responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad caller input.
    Validation,
    /// Workspace or memory exhaustion.
    Resource,
    /// External tool exited non-zero or could not be spawned.
    Tool,
    /// A stage exceeded its time budget.
    Timeout,
    /// A tool reported success but a declared output is absent.
    MissingOutput,
    /// An in-process codec returned an error.
    Library,
    /// The caller aborted the job.
    Cancelled,
    /// Unexpected lower-level failure.
    Internal,
}

/// Failure taxonomy for one job.
#[derive(thiserror::Error, Debug)]
pub enum JobFailure {
    /// Invalid caller-provided job description or input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The workspace filesystem or an output size budget was exhausted.
    #[error("resource error: {0}")]
    Resource(String),

    /// An external tool exited non-zero (or failed to start).
    #[error("tool error in stage '{stage}': {program} {}: {tail}", describe_exit(.exit_code))]
    Tool {
        /// Stage that ran the tool.
        stage: String,
        /// `argv[0]` of the failed invocation.
        program: String,
        /// Exit code, `None` when the process was killed by a signal or never started.
        exit_code: Option<i32>,
        /// Tail of the captured diagnostic output.
        tail: String,
    },

    /// A stage ran past its timeout and was terminated.
    #[error("timeout error in stage '{stage}': {program} exceeded {}ms", .timeout.as_millis())]
    Timeout {
        /// Stage that ran the tool.
        stage: String,
        /// `argv[0]` of the terminated invocation.
        program: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// A tool exited successfully without producing a declared file.
    #[error("missing output error: '{name}' was not produced{}", describe_stage(.stage.as_deref()))]
    MissingOutput {
        /// Declared file name that is absent.
        name: String,
        /// Stage that declared the file, when known.
        stage: Option<String>,
    },

    /// A library codec rejected its input.
    #[error("library error in stage '{stage}': codec '{codec}': {message}")]
    Library {
        /// Stage that ran the codec.
        stage: String,
        /// Registered codec name.
        codec: String,
        /// Codec error message.
        message: String,
    },

    /// The job was aborted by its caller.
    #[error("cancelled{}", describe_stage(.stage.as_deref()))]
    Cancelled {
        /// Stage in flight when cancellation was observed.
        stage: Option<String>,
    },

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobFailure {
    /// Build a [`JobFailure::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`JobFailure::Resource`] value.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Stable classification of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Resource(_) => FailureKind::Resource,
            Self::Tool { .. } => FailureKind::Tool,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::MissingOutput { .. } => FailureKind::MissingOutput,
            Self::Library { .. } => FailureKind::Library,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Other(_) => FailureKind::Internal,
        }
    }

    /// `true` for failures a caller should report as "the conversion tool failed".
    ///
    /// Timeouts and missing outputs are tool failures for caller purposes.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Tool
                | FailureKind::Timeout
                | FailureKind::MissingOutput
                | FailureKind::Library
        )
    }

    /// `true` when a caller-declared fallback action may be attempted after this failure.
    pub fn permits_fallback(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Tool | FailureKind::MissingOutput | FailureKind::Library
        )
    }

    /// Name of the stage that failed, when the failure is attributable to one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Tool { stage, .. } | Self::Timeout { stage, .. } | Self::Library { stage, .. } => {
                Some(stage)
            }
            Self::MissingOutput { stage, .. } | Self::Cancelled { stage } => stage.as_deref(),
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "terminated without an exit code".to_string(),
    }
}

fn describe_stage(stage: Option<&str>) -> String {
    match stage {
        Some(stage) => format!(" (stage '{stage}')"),
        None => String::new(),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
