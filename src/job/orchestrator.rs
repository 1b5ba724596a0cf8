use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::collect::collector::{CollectedOutput, ResultCollector};
use crate::foundation::config::{PipelineConfig, duration_ms};
use crate::foundation::error::{JobFailure, JobOutcome};
use crate::foundation::ids::JobId;
use crate::invoke::library::{CodecInput, CodecRegistry};
use crate::invoke::process::ToolInvoker;
use crate::job::cancel::CancelToken;
use crate::job::spec::{JobSpec, Stage, StageAction};
use crate::workspace::manager::{Workspace, WorkspaceManager};
use crate::workspace::materialize::{InputMaterializer, write_atomic};

/// Lifecycle of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Workspace acquired, nothing staged.
    Created,
    /// All inputs written.
    InputsStaged,
    /// Stage `n` (0-based) is executing.
    StageRunning(usize),
    /// Stage `n` finished and its outputs were verified.
    StageComplete(usize),
    /// Outputs read into memory.
    OutputsCollected,
    /// Workspace released after success.
    TornDown,
    /// Workspace released after a failure.
    Failed,
}

impl JobState {
    /// `true` for `TornDown` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TornDown | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Created, InputsStaged) => true,
            (InputsStaged, StageRunning(0)) => true,
            (InputsStaged, OutputsCollected) => true,
            (StageRunning(a), StageComplete(b)) => a == b,
            (StageComplete(a), StageRunning(b)) => b == a + 1,
            (StageComplete(_), OutputsCollected) => true,
            (OutputsCollected, TornDown) => true,
            _ => false,
        }
    }
}

struct Lifecycle {
    job: JobId,
    state: JobState,
}

impl Lifecycle {
    fn new(job: JobId) -> Self {
        Self {
            job,
            state: JobState::Created,
        }
    }

    fn advance(&mut self, next: JobState) -> JobOutcome<()> {
        if !self.state.can_advance_to(next) {
            return Err(JobFailure::Other(anyhow::anyhow!(
                "job {} cannot move from {:?} to {:?}",
                self.job,
                self.state,
                next
            )));
        }
        tracing::debug!(job = %self.job, from = ?self.state, to = ?next, "job state");
        self.state = next;
        Ok(())
    }
}

/// Successful outcome of a job. The workspace is already gone when this is returned.
#[derive(Clone, Debug)]
pub struct JobResult {
    /// Identifier of the job that produced the outputs.
    pub job: JobId,
    /// Declared outputs by name.
    pub outputs: BTreeMap<String, CollectedOutput>,
    /// Wall-clock time of the whole job.
    pub elapsed: Duration,
}

impl JobResult {
    /// Borrow one output.
    pub fn get(&self, name: &str) -> Option<&CollectedOutput> {
        self.outputs.get(name)
    }

    /// Take ownership of the outputs.
    pub fn into_outputs(self) -> BTreeMap<String, CollectedOutput> {
        self.outputs
    }
}

/// Runs [`JobSpec`]s: stage inputs, execute stages in order, collect outputs, always tear down.
///
/// Holds no per-job state; share one instance across worker threads.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    cfg: PipelineConfig,
    workspaces: WorkspaceManager,
    invoker: ToolInvoker,
    collector: ResultCollector,
    codecs: CodecRegistry,
}

impl Orchestrator {
    /// Build an orchestrator with the built-in codecs.
    pub fn new(cfg: PipelineConfig) -> JobOutcome<Self> {
        cfg.validate()?;
        Ok(Self {
            workspaces: WorkspaceManager::new(cfg.workspace_root.clone()),
            invoker: ToolInvoker::from_config(&cfg),
            collector: ResultCollector::new(cfg.max_output_bytes),
            codecs: CodecRegistry::with_builtin(),
            cfg,
        })
    }

    /// Replace the codec registry.
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Codecs available to library-call stages.
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Run `spec` to completion.
    pub fn run(&self, spec: &JobSpec) -> JobOutcome<JobResult> {
        self.run_with_cancel(spec, &CancelToken::new())
    }

    /// Run `spec`, aborting when `cancel` is triggered.
    ///
    /// The job description is validated before a workspace exists, so dependency errors never
    /// start a tool. Once acquired, the workspace is released before this returns on every path.
    #[tracing::instrument(
        name = "job",
        skip_all,
        fields(job = tracing::field::Empty, stages = spec.stages.len())
    )]
    pub fn run_with_cancel(&self, spec: &JobSpec, cancel: &CancelToken) -> JobOutcome<JobResult> {
        let started = Instant::now();
        spec.validate(&self.codecs)?;

        let mut ws = self.workspaces.acquire()?;
        let job = ws.id();
        tracing::Span::current().record("job", tracing::field::display(job));

        let mut life = Lifecycle::new(job);
        let result = self.drive(&ws, spec, cancel, &mut life);
        ws.release();

        match result {
            Ok(outputs) => {
                life.advance(JobState::TornDown)?;
                tracing::info!(
                    job = %job,
                    outputs = outputs.len(),
                    elapsed_ms = duration_ms::millis(started.elapsed()),
                    "job finished"
                );
                Ok(JobResult {
                    job,
                    outputs,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                let at = life.state;
                life.state = JobState::Failed;
                tracing::warn!(job = %job, state = ?at, kind = ?e.kind(), error = %e, "job failed");
                Err(e)
            }
        }
    }

    fn drive(
        &self,
        ws: &Workspace,
        spec: &JobSpec,
        cancel: &CancelToken,
        life: &mut Lifecycle,
    ) -> JobOutcome<BTreeMap<String, CollectedOutput>> {
        let materializer =
            InputMaterializer::new(self.cfg.max_input_bytes).with_allow_list(spec.allow.clone());
        for input in &spec.inputs {
            materializer.write(ws, &input.name, &input.bytes, input.mime.as_deref())?;
        }
        life.advance(JobState::InputsStaged)?;

        for (idx, stage) in spec.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobFailure::Cancelled {
                    stage: Some(stage.name.clone()),
                });
            }
            life.advance(JobState::StageRunning(idx))?;
            let stage_started = Instant::now();
            self.run_stage(ws, stage, cancel)?;
            tracing::debug!(
                job = %ws.id(),
                stage = %stage.name,
                elapsed_ms = duration_ms::millis(stage_started.elapsed()),
                "stage complete"
            );
            life.advance(JobState::StageComplete(idx))?;
        }

        let outputs = self
            .collector
            .collect(ws, &spec.outputs)
            .map_err(|e| match e {
                JobFailure::MissingOutput { name, stage: None } => JobFailure::MissingOutput {
                    stage: spec.producer_of(&name).map(str::to_string),
                    name,
                },
                other => other,
            })?;
        life.advance(JobState::OutputsCollected)?;
        Ok(outputs)
    }

    fn run_stage(&self, ws: &Workspace, stage: &Stage, cancel: &CancelToken) -> JobOutcome<()> {
        let total = 1 + stage.fallbacks.len();
        let mut attempts = stage.attempts().enumerate().peekable();
        while let Some((n, action)) = attempts.next() {
            let res = self
                .run_action(ws, stage, action, cancel)
                .and_then(|()| verify_writes(ws, stage));
            match res {
                Ok(()) => {
                    if n > 0 {
                        tracing::info!(stage = %stage.name, attempt = n + 1, "fallback succeeded");
                    }
                    return Ok(());
                }
                Err(e) if e.permits_fallback() && attempts.peek().is_some() => {
                    tracing::warn!(
                        stage = %stage.name,
                        attempt = n + 1,
                        of = total,
                        error = %e,
                        "stage attempt failed, trying fallback"
                    );
                    for name in &stage.writes {
                        ws.remove_file(name)?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(JobFailure::Other(anyhow::anyhow!(
            "stage '{}' has no actions",
            stage.name
        )))
    }

    fn run_action(
        &self,
        ws: &Workspace,
        stage: &Stage,
        action: &StageAction,
        cancel: &CancelToken,
    ) -> JobOutcome<()> {
        match action {
            StageAction::ExternalTool { argv, timeout } => {
                let timeout = timeout.unwrap_or(self.cfg.default_stage_timeout);
                self.invoker
                    .run(&stage.name, ws.path(), argv, timeout, cancel)
                    .map(|_| ())
            }
            StageAction::LibraryCall { codec, options } => {
                let c = self.codecs.get(codec).ok_or_else(|| {
                    JobFailure::validation(format!("unknown codec '{codec}'"))
                })?;
                let mut buffers = Vec::with_capacity(stage.reads.len());
                for name in &stage.reads {
                    buffers.push((name.as_str(), ws.read_file(name)?));
                }
                let inputs: Vec<CodecInput<'_>> = buffers
                    .iter()
                    .map(|(name, bytes)| CodecInput {
                        name,
                        bytes: bytes.as_slice(),
                    })
                    .collect();

                let started = Instant::now();
                let out = c.call(&inputs, options).map_err(|e| JobFailure::Library {
                    stage: stage.name.clone(),
                    codec: codec.clone(),
                    message: format!("{e:#}"),
                })?;
                tracing::info!(
                    stage = %stage.name,
                    codec = %codec,
                    bytes = out.len(),
                    elapsed_ms = duration_ms::millis(started.elapsed()),
                    "codec finished"
                );
                // Validation guarantees exactly one declared write for library stages.
                let Some(target) = stage.writes.first() else {
                    return Err(JobFailure::validation(format!(
                        "library stage '{}' declares no output",
                        stage.name
                    )));
                };
                ws.remove_file(target)?;
                write_atomic(ws, target, &out)?;
                Ok(())
            }
        }
    }
}

fn verify_writes(ws: &Workspace, stage: &Stage) -> JobOutcome<()> {
    for name in &stage.writes {
        if !ws.contains(name) {
            return Err(JobFailure::MissingOutput {
                name: name.clone(),
                stage: Some(stage.name.clone()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/job/orchestrator.rs"]
mod tests;
