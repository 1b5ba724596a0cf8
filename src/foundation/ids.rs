use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-unique job identifier.
///
/// Combines wall-clock nanoseconds, the process id and a process-wide sequence number. The
/// sequence alone makes identifiers unique within one process; the pid separates processes that
/// share a workspace root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    nanos: u128,
    pid: u32,
    seq: u64,
}

impl JobId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            nanos,
            pid: std::process::id(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Sequence component; strictly increasing within a process.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Directory name used for this job's workspace.
    pub fn dir_name(&self) -> String {
        format!("job-{:x}-{}-{}", self.nanos, self.pid, self.seq)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pid, self.seq)
    }
}
