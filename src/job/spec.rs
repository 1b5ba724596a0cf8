use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::foundation::config::duration_ms;
use crate::foundation::error::{JobFailure, JobOutcome};
use crate::invoke::library::CodecRegistry;
use crate::workspace::materialize::{AllowList, validate_file_name};

/// One uploaded buffer staged into the workspace before any stage runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFile {
    /// Workspace file name; stages refer to the input by this name.
    pub name: String,
    /// File contents.
    pub bytes: Vec<u8>,
    /// Optional MIME hint from the upload.
    pub mime: Option<String>,
}

/// What a stage does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageAction {
    /// Run an external program with a literal argument vector, in the workspace directory.
    ExternalTool {
        /// Program followed by its arguments. File arguments are plain workspace names.
        argv: Vec<String>,
        /// Per-stage budget; the pipeline default applies when absent.
        #[serde(default, rename = "timeout_ms", with = "duration_ms::option")]
        timeout: Option<Duration>,
    },
    /// Call a registered in-process codec.
    LibraryCall {
        /// Registry name of the codec.
        codec: String,
        /// Codec-specific structured options.
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl StageAction {
    /// External tool action with the default timeout.
    pub fn tool<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ExternalTool {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// Library call action.
    pub fn library(codec: impl Into<String>, options: serde_json::Value) -> Self {
        Self::LibraryCall {
            codec: codec.into(),
            options,
        }
    }

    fn check(&self, stage: &Stage, codecs: &CodecRegistry) -> JobOutcome<()> {
        match self {
            Self::ExternalTool { argv, timeout } => {
                if argv.first().is_none_or(|p| p.trim().is_empty()) {
                    return Err(JobFailure::validation(format!(
                        "stage '{}' has no program to run",
                        stage.name
                    )));
                }
                if timeout.is_some_and(|t| t.is_zero()) {
                    return Err(JobFailure::validation(format!(
                        "stage '{}' has a zero timeout",
                        stage.name
                    )));
                }
            }
            Self::LibraryCall { codec, options } => {
                let Some(c) = codecs.get(codec) else {
                    return Err(JobFailure::validation(format!(
                        "stage '{}' uses unknown codec '{codec}'",
                        stage.name
                    )));
                };
                if stage.reads.is_empty() || stage.writes.len() != 1 {
                    return Err(JobFailure::validation(format!(
                        "library stage '{}' must read at least one file and write exactly one",
                        stage.name
                    )));
                }
                c.check_options(options)?;
            }
        }
        Ok(())
    }
}

/// One unit of work with declared file dependencies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    /// Unique name within the job; used in logs and failures.
    pub name: String,
    /// Files that must exist before the stage starts.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Files the stage must produce.
    pub writes: Vec<String>,
    /// Primary action.
    pub action: StageAction,
    /// Alternatives tried in order when the previous attempt fails as a tool.
    #[serde(default)]
    pub fallbacks: Vec<StageAction>,
}

impl Stage {
    /// Stage running an external tool.
    pub fn tool<I, S>(name: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, StageAction::tool(argv))
    }

    /// Stage calling a registered codec.
    pub fn library(
        name: impl Into<String>,
        codec: impl Into<String>,
        options: serde_json::Value,
    ) -> Self {
        Self::new(name, StageAction::library(codec, options))
    }

    /// Stage with an arbitrary primary action and no declared files yet.
    pub fn new(name: impl Into<String>, action: StageAction) -> Self {
        Self {
            name: name.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            action,
            fallbacks: Vec::new(),
        }
    }

    /// Declare files read by the stage.
    pub fn reads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare files produced by the stage.
    pub fn writes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the timeout of the primary action (external tools only).
    pub fn timeout(mut self, budget: Duration) -> Self {
        if let StageAction::ExternalTool { timeout, .. } = &mut self.action {
            *timeout = Some(budget);
        }
        self
    }

    /// Append a fallback action.
    pub fn with_fallback(mut self, action: StageAction) -> Self {
        self.fallbacks.push(action);
        self
    }

    /// Primary action followed by fallbacks.
    pub fn attempts(&self) -> impl Iterator<Item = &StageAction> {
        std::iter::once(&self.action).chain(self.fallbacks.iter())
    }
}

/// Everything the pipeline needs to run one job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobSpec {
    /// Buffers staged before the first stage, in order.
    pub inputs: Vec<InputFile>,
    /// Stages, executed strictly in order.
    pub stages: Vec<Stage>,
    /// Files read back into the result after the last stage.
    pub outputs: Vec<String>,
    /// Accepted input types for this endpoint.
    pub allow: AllowList,
}

impl JobSpec {
    /// An empty job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input buffer.
    pub fn input(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.inputs.push(InputFile {
            name: name.into(),
            bytes: bytes.into(),
            mime: None,
        });
        self
    }

    /// Add an input buffer with a MIME hint.
    pub fn input_with_mime(
        mut self,
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        mime: impl Into<String>,
    ) -> Self {
        self.inputs.push(InputFile {
            name: name.into(),
            bytes: bytes.into(),
            mime: Some(mime.into()),
        });
        self
    }

    /// Append a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append several stages.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Declare an expected output.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Restrict accepted inputs.
    pub fn allow(mut self, allow: AllowList) -> Self {
        self.allow = allow;
        self
    }

    /// Check names and the file dependency graph without touching the filesystem.
    ///
    /// Every file a stage reads must be an input or written by an earlier stage; no stage may
    /// overwrite a file that already exists at its point in the sequence; every output must be
    /// available after the last stage.
    pub fn validate(&self, codecs: &CodecRegistry) -> JobOutcome<()> {
        if self.outputs.is_empty() {
            return Err(JobFailure::validation("job declares no outputs"));
        }

        let mut available = BTreeSet::new();
        for input in &self.inputs {
            validate_file_name(&input.name)?;
            if !available.insert(input.name.as_str()) {
                return Err(JobFailure::validation(format!(
                    "input '{}' is supplied more than once",
                    input.name
                )));
            }
        }

        let mut stage_names = BTreeSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(JobFailure::validation("stage name must not be empty"));
            }
            if !stage_names.insert(stage.name.as_str()) {
                return Err(JobFailure::validation(format!(
                    "stage name '{}' is used more than once",
                    stage.name
                )));
            }
            for read in &stage.reads {
                validate_file_name(read)?;
                if !available.contains(read.as_str()) {
                    return Err(JobFailure::validation(format!(
                        "stage '{}' reads '{read}', which is neither an input nor produced by an earlier stage",
                        stage.name
                    )));
                }
            }
            if stage.writes.is_empty() {
                return Err(JobFailure::validation(format!(
                    "stage '{}' declares no output files",
                    stage.name
                )));
            }
            for action in stage.attempts() {
                action.check(stage, codecs)?;
            }
            let mut produced = BTreeSet::new();
            for write in &stage.writes {
                validate_file_name(write)?;
                if available.contains(write.as_str()) || !produced.insert(write.as_str()) {
                    return Err(JobFailure::validation(format!(
                        "stage '{}' writes '{write}', which already exists at that point",
                        stage.name
                    )));
                }
            }
            available.extend(produced);
        }

        let mut outputs = BTreeSet::new();
        for out in &self.outputs {
            validate_file_name(out)?;
            if !outputs.insert(out.as_str()) {
                return Err(JobFailure::validation(format!(
                    "output '{out}' is declared more than once"
                )));
            }
            if !available.contains(out.as_str()) {
                return Err(JobFailure::validation(format!(
                    "output '{out}' is never produced"
                )));
            }
        }
        Ok(())
    }

    /// Name of the last stage declaring `file` as an output.
    pub fn producer_of(&self, file: &str) -> Option<&str> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.writes.iter().any(|w| w == file))
            .map(|s| s.name.as_str())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/job/spec.rs"]
mod tests;
