use std::io::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{JobFailure, JobOutcome};
use crate::workspace::manager::Workspace;

const MAX_NAME_LEN: usize = 255;

/// Check that `name` is a plain file name that cannot escape a workspace.
///
/// Rejected: empty names, separators, `..`, drive/absolute markers and NUL. Leading characters
/// that tools give a meaning to are refused too: `.` (scratch files), `-` (options), and `|`, `%`
/// and `@` (ghostscript pipes, devices and argument files).
pub fn validate_file_name(name: &str) -> JobOutcome<()> {
    if name.is_empty() {
        return Err(JobFailure::validation("file name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(JobFailure::validation(format!(
            "file name is longer than {MAX_NAME_LEN} bytes"
        )));
    }
    if name.contains("..") {
        return Err(JobFailure::validation(format!(
            "file name '{name}' contains a path traversal sequence"
        )));
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | ':' | '\0')) {
        return Err(JobFailure::validation(format!(
            "file name '{}' must not contain path separators or drive markers",
            name.escape_debug()
        )));
    }
    if name.starts_with(['.', '-', '|', '%', '@']) {
        return Err(JobFailure::validation(format!(
            "file name '{}' must not start with '{}'",
            name.escape_debug(),
            &name[..1]
        )));
    }
    Ok(())
}

/// Caller-supplied allow-list of accepted input types.
///
/// An empty list accepts everything for that dimension. Extensions are compared
/// case-insensitively without the leading dot; MIME entries may end in `/*`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllowList {
    /// Accepted file extensions, e.g. `["png", "jpg"]`.
    pub extensions: Vec<String>,
    /// Accepted MIME types, e.g. `["image/*", "application/pdf"]`.
    pub mime_types: Vec<String>,
}

impl AllowList {
    /// Accept every input.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict inputs to the given extensions.
    pub fn extensions<I, S>(exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: exts.into_iter().map(Into::into).collect(),
            mime_types: Vec::new(),
        }
    }

    /// Additionally restrict inputs to the given MIME types.
    pub fn with_mime_types<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types = mimes.into_iter().map(Into::into).collect();
        self
    }

    /// Check a declared name and optional MIME hint against the list.
    pub fn check(&self, name: &str, mime: Option<&str>) -> JobOutcome<()> {
        if !self.extensions.is_empty() {
            let ext = name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .unwrap_or_default();
            let ok = self
                .extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext));
            if !ok {
                return Err(JobFailure::validation(format!(
                    "file '{name}' has an extension that is not accepted here"
                )));
            }
        }

        if !self.mime_types.is_empty() {
            let Some(mime) = mime else {
                return Err(JobFailure::validation(format!(
                    "file '{name}' has no MIME type but one is required"
                )));
            };
            let mime = mime.trim().to_ascii_lowercase();
            if !self.mime_types.iter().any(|m| mime_matches(m, &mime)) {
                return Err(JobFailure::validation(format!(
                    "file '{name}' has MIME type '{mime}' which is not accepted here"
                )));
            }
        }
        Ok(())
    }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    match pattern.strip_suffix("/*") {
        Some(top) => mime
            .split_once('/')
            .is_some_and(|(mime_top, _)| mime_top == top),
        None => pattern == mime,
    }
}

/// Writes caller buffers into a workspace after validating them.
#[derive(Clone, Debug)]
pub struct InputMaterializer {
    max_bytes: u64,
    allow: AllowList,
}

impl InputMaterializer {
    /// Materializer enforcing a per-file byte cap and accepting any type.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            allow: AllowList::any(),
        }
    }

    /// Enforce `allow` on every write.
    pub fn with_allow_list(mut self, allow: AllowList) -> Self {
        self.allow = allow;
        self
    }

    /// Validate and write `bytes` to `name` inside `ws`, returning the final path.
    ///
    /// Nothing is written when validation fails. The data lands in a hidden partial file that is
    /// synced and then renamed, so the final name only ever refers to complete contents.
    pub fn write(
        &self,
        ws: &Workspace,
        name: &str,
        bytes: &[u8],
        mime: Option<&str>,
    ) -> JobOutcome<PathBuf> {
        validate_file_name(name)?;
        if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > self.max_bytes {
            return Err(JobFailure::validation(format!(
                "file '{name}' is {} bytes, above the {} byte limit",
                bytes.len(),
                self.max_bytes
            )));
        }
        self.allow.check(name, mime)?;

        if ws.path().join(name).exists() {
            return Err(JobFailure::validation(format!(
                "file '{name}' was supplied more than once"
            )));
        }
        let dest = write_atomic(ws, name, bytes)?;
        tracing::debug!(job = %ws.id(), file = name, bytes = bytes.len(), "input staged");
        Ok(dest)
    }
}

/// Write `bytes` as `name` in `ws` through a synced temp file that is then persisted.
pub(crate) fn write_atomic(ws: &Workspace, name: &str, bytes: &[u8]) -> JobOutcome<PathBuf> {
    let dest = ws.path().join(name);

    let res = (|| -> std::io::Result<()> {
        let temp = tempfile::NamedTempFile::new_in(ws.path())?;
        let mut file = temp.as_file();
        file.write_all(bytes)?;
        file.sync_all()?;
        temp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })();

    res.map_err(|e| {
        JobFailure::resource(format!("failed to write '{name}' into workspace: {e}"))
    })?;
    Ok(dest)
}

#[cfg(test)]
#[path = "../../tests/unit/workspace/materialize.rs"]
mod tests;
