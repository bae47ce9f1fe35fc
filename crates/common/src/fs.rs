use std::{
    io::Write,
    path::Path,
};

use anyhow::Context;
use tempfile::NamedTempFile;

/// Write `contents` to `path` atomically: stage into a sibling temp file and
/// rename over the target so readers never observe a partial document.
pub fn write_atomically(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::write_atomically;

    #[test]
    fn write_then_read_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("doc.json");
        write_atomically(&path, b"{\"ok\":true}")?;
        assert_eq!(std::fs::read(&path)?, b"{\"ok\":true}");
        // Overwrite in place.
        write_atomically(&path, b"{}")?;
        assert_eq!(std::fs::read(&path)?, b"{}");
        Ok(())
    }
}
