use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use edge_registry_contracts::persist::StagedWrite;
use edge_registry_contracts::{RegistryError, Result};
use sha2::{Digest, Sha256};

const CANONICAL_STEM: &str = "artifact";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Relative to the base dir, `/`-separated, as recorded in metadata.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub source_filename: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Owns `{base_dir}/{models_dir}/{name}/{version}/`. Layout is derivable from
/// `(base_dir, name, version)` alone.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
    models_dir: String,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>, models_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            models_dir: models_dir.into(),
        }
    }

    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.base_dir.join(&self.models_dir).join(name).join(version)
    }

    /// Copies `source` into the version directory. The artifact is written
    /// to a temporary sibling and renamed into place, so the canonical file
    /// is either complete or absent.
    pub fn store(
        &self,
        name: &str,
        version: &str,
        source: &Path,
        overwrite: bool,
    ) -> Result<StoredArtifact> {
        let source_file = open_source(source)?;
        self.store_from(name, version, source, source_file, overwrite)
    }

    fn store_from<R: Read>(
        &self,
        name: &str,
        version: &str,
        source: &Path,
        reader: R,
        overwrite: bool,
    ) -> Result<StoredArtifact> {
        let dir = self.version_dir(name, version);
        if dir_has_entries(&dir)? {
            if !overwrite {
                return Err(RegistryError::ArtifactConflict { path: dir });
            }
            tracing::warn!(dir = %dir.display(), "overwriting orphaned artifact directory");
            fs::remove_dir_all(&dir).map_err(|err| RegistryError::io(&dir, err))?;
        }
        fs::create_dir_all(&dir).map_err(|err| RegistryError::io(&dir, err))?;
        tracing::debug!(dir = %dir.display(), "artifact directory prepared");

        let file_name = canonical_file_name(source);
        let target = dir.join(&file_name);
        let mut reader = HashingReader::new(reader);
        let staged = match StagedWrite::stage_from(&target, &mut reader) {
            Ok(staged) => staged,
            Err(err) => {
                remove_empty_dir(&dir);
                return Err(RegistryError::io(source, err));
            }
        };
        let size_bytes = staged.len();
        let sha256 = reader.finish();
        staged.commit_new().map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => RegistryError::ArtifactConflict { path: dir.clone() },
            _ => {
                remove_empty_dir(&dir);
                RegistryError::io(&target, err)
            }
        })?;

        Ok(StoredArtifact {
            relative_path: format!("{}/{name}/{version}/{file_name}", self.models_dir),
            absolute_path: target,
            source_filename: source
                .file_name()
                .map(|value| value.to_string_lossy().to_string())
                .unwrap_or_default(),
            size_bytes,
            sha256,
        })
    }

    /// Absolute location of a recorded artifact path.
    pub fn resolve(&self, artifact_path: &str) -> Result<PathBuf> {
        let relative = Path::new(artifact_path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(RegistryError::validation(format!(
                "artifact path '{artifact_path}' escapes the registry base directory"
            )));
        }
        let joined = self.base_dir.join(relative);
        match fs::canonicalize(&joined) {
            Ok(path) if path.is_file() => Ok(path),
            Ok(path) => Err(RegistryError::ArtifactNotFound { path }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(RegistryError::ArtifactNotFound { path: joined })
            }
            Err(err) => Err(RegistryError::io(joined, err)),
        }
    }

    /// Removes a version directory that was never published in metadata.
    pub fn discard(&self, name: &str, version: &str) -> Result<()> {
        let dir = self.version_dir(name, version);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RegistryError::io(dir, err)),
        }
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RegistryError::ArtifactNotFound {
                path: path.to_path_buf(),
            },
            _ => RegistryError::io(path, err),
        })
    }

    /// Size and sha256 of an artifact already on disk.
    pub fn digest(&self, path: &Path) -> Result<(u64, String)> {
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RegistryError::ArtifactNotFound {
                path: path.to_path_buf(),
            },
            _ => RegistryError::io(path, err),
        })?;
        let mut reader = HashingReader::new(file);
        let size =
            io::copy(&mut reader, &mut io::sink()).map_err(|err| RegistryError::io(path, err))?;
        Ok((size, reader.finish()))
    }
}

fn open_source(source: &Path) -> Result<File> {
    let metadata = fs::metadata(source).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => RegistryError::validation(format!(
            "source model artifact not found: {}",
            source.display()
        )),
        _ => RegistryError::io(source, err),
    })?;
    if !metadata.is_file() {
        return Err(RegistryError::validation(format!(
            "source model artifact is not a regular file: {}",
            source.display()
        )));
    }
    File::open(source).map_err(|err| RegistryError::io(source, err))
}

/// Best effort; a directory someone else populated meanwhile is left alone.
fn remove_empty_dir(dir: &Path) {
    if let Err(err) = fs::remove_dir(dir) {
        tracing::debug!(dir = %dir.display(), error = %err, "version directory kept after failed copy");
    }
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(RegistryError::io(dir, err)),
    }
}

fn canonical_file_name(source: &Path) -> String {
    match source
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .filter(|ext| !ext.is_empty())
    {
        Some(ext) => format!("{CANONICAL_STEM}.{ext}"),
        None => CANONICAL_STEM.to_string(),
    }
}

struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}
