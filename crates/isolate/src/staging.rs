//! Per-invocation file staging. Inputs land in a unique temp directory that
//! is removed on every exit path, success or failure.

use std::path::PathBuf;

use anyhow::Context;
use tempfile::TempDir;

use crate::request::FileInput;

pub struct StagedFileMeta {
    pub name: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
    pub size: u64,
}

/// RAII handle over the staged directory; dropping it removes the directory
/// best-effort, logging (not raising) any cleanup failure.
pub struct StagedFiles {
    dir: Option<TempDir>,
    pub files: Vec<StagedFileMeta>,
}

impl StagedFiles {
    pub fn dir_path(&self) -> Option<&std::path::Path> {
        self.dir.as_ref().map(|d| d.path())
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!("failed to remove staged directory {}: {e}", path.display());
            }
        }
    }
}

/// Make a file name safe to place in the staging directory: path separators
/// become `_`, surrounding whitespace is trimmed, empty names fall back to
/// `file.bin`, and the result is capped at 255 characters.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        return "file.bin".to_string();
    }
    trimmed.chars().take(255).collect()
}

/// Write each input into a fresh temp directory and return the staged
/// metadata, or `None` when there is nothing to stage.
pub fn stage_files(files: &[FileInput]) -> anyhow::Result<Option<StagedFiles>> {
    if files.is_empty() {
        return Ok(None);
    }
    let dir = tempfile::Builder::new()
        .prefix("faas-invoke-")
        .tempdir()
        .context("failed to create staging directory")?;
    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        let name = sanitize_file_name(&file.name);
        let path = dir.path().join(&name);
        std::fs::write(&path, &file.bytes)
            .with_context(|| format!("failed to stage {}", path.display()))?;
        staged.push(StagedFileMeta {
            name,
            content_type: file.content_type.clone(),
            path,
            size: file.bytes.len() as u64,
        });
    }
    Ok(Some(StagedFiles {
        dir: Some(dir),
        files: staged,
    }))
}
