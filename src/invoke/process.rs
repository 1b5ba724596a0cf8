use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::foundation::config::{PipelineConfig, duration_ms};
use crate::foundation::error::{JobFailure, JobOutcome};
use crate::job::cancel::CancelToken;

/// Diagnostic record of one finished external process.
///
/// Logged by the invoker; never part of a job's result.
#[derive(Clone, Debug)]
pub struct ToolInvocation {
    /// Argument vector exactly as passed to the OS, `argv[0]` first.
    pub argv: Vec<String>,
    /// Exit code, `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    /// Tail of captured stderr.
    pub stderr_tail: Vec<u8>,
    /// Tail of captured stdout.
    pub stdout_tail: Vec<u8>,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
}

impl ToolInvocation {
    /// Best available diagnostic text: stderr tail, or stdout tail when stderr is empty.
    pub fn diagnostic_tail(&self) -> String {
        let bytes = if self.stderr_tail.iter().all(u8::is_ascii_whitespace) {
            &self.stdout_tail
        } else {
            &self.stderr_tail
        };
        String::from_utf8_lossy(bytes).trim().to_string()
    }
}

/// Runs external tools as literal argument vectors with timeout, cancellation and bounded capture.
///
/// No shell is involved: `argv[0]` is resolved through `PATH` by the OS and every other element
/// reaches the tool as one argument, whatever characters it contains.
#[derive(Clone, Debug)]
pub struct ToolInvoker {
    tail_bytes: usize,
    poll_interval: Duration,
}

impl ToolInvoker {
    /// Invoker keeping `tail_bytes` of each output stream and polling every `poll_interval`.
    pub fn new(tail_bytes: usize, poll_interval: Duration) -> Self {
        Self {
            tail_bytes: tail_bytes.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Invoker using the limits from `cfg`.
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(cfg.diagnostic_tail_bytes, cfg.poll_interval)
    }

    /// Execute `argv` in `working_dir` and wait for it, at most `timeout`.
    ///
    /// `stage` only labels logs and failures. Returns the invocation record when the process
    /// exits zero; a non-zero exit, spawn failure, timeout or cancellation becomes a classified
    /// [`JobFailure`].
    ///
    /// On unix the tool leads its own process group. The group is killed on timeout and on
    /// cancellation, and once the tool exits, so background children never outlive the call.
    pub fn run(
        &self,
        stage: &str,
        working_dir: &Path,
        argv: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> JobOutcome<ToolInvocation> {
        let Some((program, args)) = argv.split_first() else {
            return Err(JobFailure::validation(format!(
                "stage '{stage}' has an empty argument vector"
            )));
        };
        if cancel.is_cancelled() {
            return Err(JobFailure::Cancelled {
                stage: Some(stage.to_string()),
            });
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| JobFailure::Tool {
            stage: stage.to_string(),
            program: program.clone(),
            exit_code: None,
            tail: format!("failed to spawn (is it installed and on PATH?): {e}"),
        })?;
        tracing::debug!(stage, argv = ?argv, pid = child.id(), "tool started");

        let mut drains = TailDrains::spawn(&mut child, self.tail_bytes);
        let budget = Budget {
            started,
            timeout,
            poll: self.poll_interval,
        };

        let status = match budget.wait(&mut child, cancel) {
            Wait::Exited(status) => status,
            Wait::Interrupted(why) => {
                terminate(&mut child);
                return Err(interrupted(stage, program, timeout, why));
            }
            Wait::Failed(e) => {
                terminate(&mut child);
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to wait for '{program}' in stage '{stage}'"))
                    .into());
            }
        };

        // Background processes the tool left behind still hold the pipes open.
        kill_group(child.id());
        if let Err(why) = drains.finish(&budget, cancel) {
            return Err(interrupted(stage, program, timeout, why));
        }

        let invocation = ToolInvocation {
            argv: argv.to_vec(),
            exit_code: status.code(),
            stderr_tail: drains.stderr,
            stdout_tail: drains.stdout,
            elapsed: started.elapsed(),
        };

        if !status.success() {
            let tail = invocation.diagnostic_tail();
            tracing::warn!(
                stage,
                argv = ?invocation.argv,
                exit_code = ?invocation.exit_code,
                elapsed_ms = duration_ms::millis(invocation.elapsed),
                tail = %tail,
                "tool failed"
            );
            return Err(JobFailure::Tool {
                stage: stage.to_string(),
                program: program.clone(),
                exit_code: invocation.exit_code,
                tail,
            });
        }

        tracing::info!(
            stage,
            argv = ?invocation.argv,
            elapsed_ms = duration_ms::millis(invocation.elapsed),
            "tool finished"
        );
        Ok(invocation)
    }
}

fn interrupted(stage: &str, program: &str, timeout: Duration, why: Interrupt) -> JobFailure {
    match why {
        Interrupt::TimedOut => {
            tracing::warn!(
                stage,
                program,
                timeout_ms = duration_ms::millis(timeout),
                "tool timed out and was killed"
            );
            JobFailure::Timeout {
                stage: stage.to_string(),
                program: program.to_string(),
                timeout,
            }
        }
        Interrupt::Cancelled => {
            tracing::info!(stage, program, "tool killed on cancellation");
            JobFailure::Cancelled {
                stage: Some(stage.to_string()),
            }
        }
    }
}

/// Wall-clock budget of one invocation.
struct Budget {
    started: Instant,
    timeout: Duration,
    poll: Duration,
}

impl Budget {
    /// Time left before the deadline, or the reason to stop now.
    fn remaining(&self, cancel: &CancelToken) -> Result<Duration, Interrupt> {
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        let elapsed = self.started.elapsed();
        if elapsed >= self.timeout {
            return Err(Interrupt::TimedOut);
        }
        Ok(self.timeout - elapsed)
    }

    fn wait(&self, child: &mut Child, cancel: &CancelToken) -> Wait {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Wait::Exited(status),
                Ok(None) => {}
                Err(e) => return Wait::Failed(e),
            }
            match self.remaining(cancel) {
                Ok(left) => std::thread::sleep(self.poll.min(left)),
                Err(why) => return Wait::Interrupted(why),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    TimedOut,
    Cancelled,
}

enum Wait {
    Exited(ExitStatus),
    Interrupted(Interrupt),
    Failed(std::io::Error),
}

fn terminate(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Ok(pgid) = i32::try_from(pid) {
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

type DrainMsg = (Stream, std::io::Result<Vec<u8>>);

/// Tails of the child's output streams, filled by one reader thread per stream.
///
/// Readers report over a channel so collection can give up at the deadline; a reader stuck on a
/// pipe held by an escaped process is left detached.
struct TailDrains {
    rx: mpsc::Receiver<DrainMsg>,
    pending: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl TailDrains {
    fn spawn(child: &mut Child, cap: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut drains = Self {
            rx,
            pending: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        if let Some(out) = child.stdout.take() {
            drains.start(&tx, Stream::Stdout, out, cap);
        }
        if let Some(err) = child.stderr.take() {
            drains.start(&tx, Stream::Stderr, err, cap);
        }
        drains
    }

    fn start<R: Read + Send + 'static>(
        &mut self,
        tx: &mpsc::Sender<DrainMsg>,
        stream: Stream,
        r: R,
        cap: usize,
    ) {
        let tx = tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send((stream, read_tail(r, cap)));
        });
        self.pending += 1;
    }

    fn finish(&mut self, budget: &Budget, cancel: &CancelToken) -> Result<(), Interrupt> {
        while self.pending > 0 {
            let left = budget.remaining(cancel)?;
            match self.rx.recv_timeout(budget.poll.min(left)) {
                Ok((stream, res)) => {
                    self.pending -= 1;
                    let bytes = res.unwrap_or_else(|e| {
                        tracing::debug!(error = %e, ?stream, "tool output read failed");
                        Vec::new()
                    });
                    match stream {
                        Stream::Stdout => self.stdout = bytes,
                        Stream::Stderr => self.stderr = bytes,
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    tracing::debug!("tool output drain thread panicked");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Read `r` to the end, keeping only the last `cap` bytes.
pub(crate) fn read_tail<R: Read>(mut r: R, cap: usize) -> std::io::Result<Vec<u8>> {
    let mut tail = Vec::with_capacity(cap.min(64 * 1024));
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > cap {
            let excess = tail.len() - cap;
            tail.drain(..excess);
        }
    }
    Ok(tail)
}

/// Return `true` when `program` can be spawned from `PATH` and exits zero for `version_arg`.
pub fn is_tool_on_path(program: &str, version_arg: &str) -> bool {
    Command::new(program)
        .arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "../../tests/unit/invoke/process.rs"]
mod tests;
