use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::foundation::error::{JobFailure, JobOutcome};
use crate::job::spec::{InputFile, JobSpec, Stage};
use crate::workspace::materialize::AllowList;

/// Input entry of a [`JobManifest`]: a file on disk to upload into the job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestInput {
    /// Source file, relative to the manifest's directory unless absolute.
    pub path: PathBuf,
    /// Workspace name; defaults to the source file name.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional MIME hint.
    #[serde(default)]
    pub mime: Option<String>,
}

/// JSON form of a job for the command line: inputs by path instead of by buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobManifest {
    /// Files staged into the workspace.
    pub inputs: Vec<ManifestInput>,
    /// Stages in execution order.
    pub stages: Vec<Stage>,
    /// Expected outputs.
    pub outputs: Vec<String>,
    /// Accepted input types.
    #[serde(default)]
    pub allow: AllowList,
}

impl JobManifest {
    /// Parse a manifest from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> JobOutcome<Self> {
        serde_json::from_reader(r)
            .map_err(|e| JobFailure::validation(format!("parse job manifest JSON: {e}")))
    }

    /// Parse a manifest from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> JobOutcome<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            JobFailure::validation(format!("open job manifest '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Read every input relative to `base_dir` and build the in-memory [`JobSpec`].
    ///
    /// Files larger than `max_input_bytes` are rejected before they are read.
    pub fn into_spec(self, base_dir: &Path, max_input_bytes: u64) -> JobOutcome<JobSpec> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for input in self.inputs {
            let path = if input.path.is_absolute() {
                input.path.clone()
            } else {
                base_dir.join(&input.path)
            };
            let name = match input.name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        JobFailure::validation(format!(
                            "input '{}' has no usable file name",
                            path.display()
                        ))
                    })?,
            };
            let len = std::fs::metadata(&path)
                .map_err(|e| {
                    JobFailure::validation(format!("stat input '{}': {e}", path.display()))
                })?
                .len();
            if len > max_input_bytes {
                return Err(JobFailure::validation(format!(
                    "input '{}' is {len} bytes, above the {max_input_bytes} byte limit",
                    path.display()
                )));
            }
            let bytes = std::fs::read(&path).map_err(|e| {
                JobFailure::validation(format!("read input '{}': {e}", path.display()))
            })?;
            inputs.push(InputFile {
                name,
                bytes,
                mime: input.mime,
            });
        }

        Ok(JobSpec {
            inputs,
            stages: self.stages,
            outputs: self.outputs,
            allow: self.allow,
        })
    }
}
