//! Durable write-temp-then-rename primitive.
//!
//! Content is written to a sibling temporary file in the target's directory,
//! fsynced, and only then renamed over the target. A reader of the target
//! path sees either the previous complete file or the new complete file.
//! Dropping a [`StagedWrite`] without committing removes the temporary file
//! and leaves the target untouched.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: NamedTempFile,
    len: u64,
}

impl StagedWrite {
    pub fn stage(target: impl Into<PathBuf>, contents: &[u8]) -> io::Result<Self> {
        let mut reader = contents;
        Self::stage_from(target, &mut reader)
    }

    pub fn stage_from<R: Read + ?Sized>(
        target: impl Into<PathBuf>,
        reader: &mut R,
    ) -> io::Result<Self> {
        let target = target.into();
        let parent = parent_dir(&target);
        std::fs::create_dir_all(&parent)?;
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "staged".to_string());
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&parent)?;
        let len = io::copy(reader, &mut temp)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        Ok(Self { target, temp, len })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically replaces the target.
    pub fn commit(self) -> io::Result<()> {
        let Self { target, temp, .. } = self;
        temp.persist(&target).map_err(|err| err.error)?;
        sync_dir(&parent_dir(&target));
        Ok(())
    }

    /// Like [`commit`](Self::commit) but fails with `AlreadyExists` instead
    /// of replacing an existing target.
    pub fn commit_new(self) -> io::Result<()> {
        let Self { target, temp, .. } = self;
        temp.persist_noclobber(&target).map_err(|err| err.error)?;
        sync_dir(&parent_dir(&target));
        Ok(())
    }
}

pub fn write_atomic(target: impl Into<PathBuf>, contents: &[u8]) -> io::Result<()> {
    StagedWrite::stage(target, contents)?.commit()
}

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// Persists the rename itself; not all platforms allow opening a directory.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = std::fs::File::open(dir).and_then(|handle| handle.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %err, "directory fsync skipped");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{write_atomic, StagedWrite};

    fn leftover_temps(dir: &std::path::Path) -> anyhow::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if name.ends_with(".tmp") {
                count += 1;
            }
        }
        Ok(count)
    }

    #[test]
    fn write_atomic_creates_and_replaces() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("registry.json");
        write_atomic(&path, b"first")?;
        assert_eq!(fs::read(&path)?, b"first");
        write_atomic(&path, b"second, longer content")?;
        assert_eq!(fs::read(&path)?, b"second, longer content");
        assert_eq!(leftover_temps(path.parent().unwrap_or(temp.path()))?, 0);
        Ok(())
    }

    #[test]
    fn staged_write_is_invisible_until_commit() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("registry.json");
        write_atomic(&path, b"old complete content")?;

        let staged = StagedWrite::stage(&path, b"new")?;
        assert_eq!(staged.len(), 3);
        assert!(staged.temp_path().exists());
        assert_eq!(staged.temp_path().parent(), Some(temp.path()));
        assert_eq!(fs::read(&path)?, b"old complete content");

        staged.commit()?;
        assert_eq!(fs::read(&path)?, b"new");
        Ok(())
    }

    #[test]
    fn abandoned_stage_leaves_target_intact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("registry.json");
        write_atomic(&path, b"old complete content")?;

        let staged = StagedWrite::stage(&path, b"new content that never lands")?;
        let temp_path = staged.temp_path().to_path_buf();
        drop(staged);

        assert_eq!(fs::read(&path)?, b"old complete content");
        assert!(!temp_path.exists());
        Ok(())
    }

    #[test]
    fn commit_new_refuses_to_clobber() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("artifact.bin");
        StagedWrite::stage(&path, b"one")?.commit_new()?;
        let err = StagedWrite::stage(&path, b"two")?.commit_new().err();
        assert_eq!(
            err.map(|e| e.kind()),
            Some(std::io::ErrorKind::AlreadyExists)
        );
        assert_eq!(fs::read(&path)?, b"one");
        Ok(())
    }
}
