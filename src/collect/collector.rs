use std::collections::BTreeMap;

use anyhow::Context as _;
use serde::Serialize;

use crate::foundation::error::{JobFailure, JobOutcome};
use crate::workspace::manager::Workspace;

/// One output file read back from a workspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CollectedOutput {
    /// File contents, owned by the caller.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Detected content type, e.g. `image/gif`.
    pub content_type: String,
}

impl CollectedOutput {
    /// Size of the output in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Reads declared outputs into memory under a total size budget.
#[derive(Clone, Debug)]
pub struct ResultCollector {
    max_total_bytes: u64,
}

impl ResultCollector {
    /// Collector refusing to read more than `max_total_bytes` across all outputs.
    pub fn new(max_total_bytes: u64) -> Self {
        Self { max_total_bytes }
    }

    /// Read every file in `names` from `ws`.
    ///
    /// All files are checked for presence and size before any is read, so a missing output or
    /// an oversized result fails without buffering anything.
    pub fn collect(
        &self,
        ws: &Workspace,
        names: &[String],
    ) -> JobOutcome<BTreeMap<String, CollectedOutput>> {
        let mut total: u64 = 0;
        let mut paths = Vec::with_capacity(names.len());
        for name in names {
            let path = ws.file_path(name)?;
            let meta = match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_file() => meta,
                _ => {
                    return Err(JobFailure::MissingOutput {
                        name: name.clone(),
                        stage: None,
                    });
                }
            };
            total = total.saturating_add(meta.len());
            if total > self.max_total_bytes {
                return Err(JobFailure::resource(format!(
                    "job outputs exceed the {} byte limit",
                    self.max_total_bytes
                )));
            }
            paths.push((name, path));
        }

        let mut out = BTreeMap::new();
        for (name, path) in paths {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read output '{}'", path.display()))?;
            let content_type = detect_content_type(name, &bytes).to_string();
            tracing::debug!(
                job = %ws.id(),
                file = %name,
                bytes = bytes.len(),
                content_type = %content_type,
                "output collected"
            );
            out.insert(
                name.clone(),
                CollectedOutput {
                    bytes,
                    content_type,
                },
            );
        }
        Ok(out)
    }
}

/// Best-effort content type from magic bytes, then the file extension.
pub fn detect_content_type(name: &str, bytes: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type();
    }
    if let Some(mime) = sniff_media(bytes) {
        return mime;
    }
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn sniff_media(b: &[u8]) -> Option<&'static str> {
    if b.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }
    if b.len() >= 12 && &b[4..8] == b"ftyp" {
        return Some(match &b[8..12] {
            b"qt  " => "video/quicktime",
            b"M4A " => "audio/mp4",
            _ => "video/mp4",
        });
    }
    if b.len() >= 12 && b.starts_with(b"RIFF") {
        return match &b[8..12] {
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }
    if b.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if b.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if b.starts_with(b"fLaC") {
        return Some("audio/flac");
    }
    if b.starts_with(b"ID3") || (b.len() >= 2 && b[0] == 0xFF && (b[1] & 0xE0) == 0xE0) {
        return Some("audio/mpeg");
    }
    None
}

#[cfg(test)]
#[path = "../../tests/unit/collect/collector.rs"]
mod tests;
