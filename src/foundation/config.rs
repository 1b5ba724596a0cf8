use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{JobFailure, JobOutcome};

/// Limits and locations shared by every job run through an [`crate::Orchestrator`].
///
/// Durations are expressed in milliseconds in the JSON form (`*_ms` keys). Missing keys take their
/// default values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory under which per-job workspaces are created.
    pub workspace_root: PathBuf,
    /// Maximum size of a single materialized input file.
    pub max_input_bytes: u64,
    /// Maximum combined size of all collected outputs of one job.
    pub max_output_bytes: u64,
    /// Timeout applied to stages that do not declare their own.
    #[serde(rename = "default_stage_timeout_ms", with = "duration_ms")]
    pub default_stage_timeout: Duration,
    /// Number of trailing bytes of tool stderr/stdout kept for diagnostics.
    pub diagnostic_tail_bytes: usize,
    /// How often a running tool is polled for exit, timeout and cancellation.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("mediajob"),
            max_input_bytes: 64 * 1024 * 1024,
            max_output_bytes: 256 * 1024 * 1024,
            default_stage_timeout: Duration::from_secs(120),
            diagnostic_tail_bytes: 8 * 1024,
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> JobOutcome<Self> {
        let cfg: Self = serde_json::from_reader(r)
            .map_err(|e| JobFailure::validation(format!("parse pipeline config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a configuration from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> JobOutcome<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            JobFailure::validation(format!("open pipeline config '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Reject limits that would make every job fail or hang.
    pub fn validate(&self) -> JobOutcome<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(JobFailure::validation("workspace_root must not be empty"));
        }
        if self.max_input_bytes == 0 || self.max_output_bytes == 0 {
            return Err(JobFailure::validation(
                "max_input_bytes and max_output_bytes must be non-zero",
            ));
        }
        if self.default_stage_timeout.is_zero() {
            return Err(JobFailure::validation(
                "default_stage_timeout_ms must be non-zero",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(JobFailure::validation("poll_interval_ms must be non-zero"));
        }
        if self.diagnostic_tail_bytes == 0 {
            return Err(JobFailure::validation(
                "diagnostic_tail_bytes must be non-zero",
            ));
        }
        Ok(())
    }

    /// Return a copy rooted at `root`.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Whole milliseconds, saturating at `u64::MAX`.
    pub(crate) fn millis(d: Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(millis(*d))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }

    pub(crate) mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub(crate) fn serialize<S: Serializer>(
            d: &Option<Duration>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
