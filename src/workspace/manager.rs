use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::{JobFailure, JobOutcome};
use crate::foundation::ids::JobId;
use crate::workspace::materialize::validate_file_name;

const MAX_CREATE_ATTEMPTS: usize = 16;

/// Allocates per-job workspace directories under a shared root.
#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager that places workspaces under `root`.
    ///
    /// The root itself is created lazily by [`WorkspaceManager::acquire`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory under which workspaces are created.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, exclusively-owned workspace directory.
    ///
    /// The leaf directory is created with an exclusive `create_dir`, so an existing directory is
    /// never reused: a name clash advances the job sequence and retries.
    pub fn acquire(&self) -> JobOutcome<Workspace> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            JobFailure::resource(format!(
                "failed to create workspace root '{}': {e}",
                self.root.display()
            ))
        })?;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = JobId::next();
            let path = self.root.join(id.dir_name());
            match create_private_dir(&path) {
                Ok(()) => {
                    tracing::debug!(job = %id, path = %path.display(), "workspace acquired");
                    return Ok(Workspace {
                        id,
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(JobFailure::resource(format!(
                        "failed to create workspace '{}': {e}",
                        path.display()
                    )));
                }
            }
        }

        Err(JobFailure::resource(format!(
            "could not allocate a unique workspace under '{}'",
            self.root.display()
        )))
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt as _;
    std::fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().create(path)
}

/// Directory owned by exactly one job.
///
/// Dropping a workspace releases it, so every exit path (including unwinding) removes the
/// directory. [`Workspace::release`] may be called explicitly first; later calls are no-ops.
#[derive(Debug)]
pub struct Workspace {
    id: JobId,
    path: PathBuf,
    released: bool,
}

impl Workspace {
    /// Identifier of the owning job.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Absolute path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` once the directory has been torn down.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Resolve a validated file name to its path inside the workspace.
    pub fn file_path(&self, name: &str) -> JobOutcome<PathBuf> {
        validate_file_name(name)?;
        Ok(self.path.join(name))
    }

    /// `true` when `name` exists in the workspace as a regular file.
    pub fn contains(&self, name: &str) -> bool {
        self.file_path(name)
            .ok()
            .and_then(|p| std::fs::symlink_metadata(p).ok())
            .is_some_and(|m| m.is_file())
    }

    /// Read a member file. Symlinks and other non-regular entries are refused, so a stage cannot
    /// point a later stage at a file outside the workspace.
    pub fn read_file(&self, name: &str) -> JobOutcome<Vec<u8>> {
        let path = self.file_path(name)?;
        let meta = std::fs::symlink_metadata(&path)
            .with_context(|| format!("failed to stat '{}'", path.display()))?;
        if !meta.is_file() {
            return Err(JobFailure::validation(format!(
                "'{name}' is not a regular file in the workspace"
            )));
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        Ok(bytes)
    }

    /// Remove a member file if present. Used to clear outputs of a failed attempt.
    pub fn remove_file(&self, name: &str) -> JobOutcome<()> {
        let path = self.file_path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to remove '{}'", path.display()))
                .into()),
        }
    }

    /// Names of the regular files currently in the workspace, sorted.
    pub fn list_files(&self) -> JobOutcome<Vec<String>> {
        let entries = std::fs::read_dir(&self.path)
            .with_context(|| format!("failed to list workspace '{}'", self.path.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.context("failed to read workspace entry")?;
            if entry.file_type().is_ok_and(|t| t.is_file())
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove the directory and everything in it.
    ///
    /// Removal errors are logged and suppressed so they never mask the job's outcome. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::debug!(job = %self.id, path = %self.path.display(), "workspace released");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job = %self.id,
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove workspace"
                );
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/workspace/manager.rs"]
mod tests;
