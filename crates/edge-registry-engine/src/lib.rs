pub mod artifacts;
pub mod cache;
pub mod config;
pub mod metadata;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use edge_registry_contracts::journal::{Journal, JournalPayload};
use edge_registry_contracts::records::now_utc_iso;
use edge_registry_contracts::validate::{validate_metrics, validate_model_name, validate_version};
use edge_registry_contracts::{ModelRecord, Registry, RegistryError, Result, VersionRecord};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

pub use artifacts::{ArtifactStore, StoredArtifact};
pub use cache::{ArtifactCache, ArtifactHandle, CacheKey, CacheStats, LoadedArtifact};
pub use config::RegistryConfig;
pub use metadata::MetadataStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub name: String,
    pub version: String,
    pub source: PathBuf,
    pub metrics: IndexMap<String, f64>,
    pub metadata: IndexMap<String, String>,
    pub overwrite_artifact: bool,
}

impl RegisterRequest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: source.into(),
            metrics: IndexMap::new(),
            metadata: IndexMap::new(),
            overwrite_artifact: false,
        }
    }

    pub fn metrics(mut self, metrics: IndexMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace an orphaned artifact left by a registration whose metadata
    /// commit never happened.
    pub fn overwrite_artifact(mut self, overwrite: bool) -> Self {
        self.overwrite_artifact = overwrite;
        self
    }
}

/// Facade over the metadata store, the artifact store and the artifact
/// cache.
///
/// Registrations are serialized by `writer`, which is held across the whole
/// copy-insert-save cycle. The published aggregate in `state` is only
/// write-locked to swap in a committed snapshot, so reads and warm loads never
/// wait on another registration's disk I/O. Nothing coordinates separate
/// processes sharing a base dir: the last rename wins.
#[derive(Debug)]
pub struct ModelRegistry {
    config: RegistryConfig,
    metadata: MetadataStore,
    artifacts: ArtifactStore,
    cache: Arc<ArtifactCache>,
    journal: Option<Journal>,
    writer: Mutex<()>,
    state: RwLock<Registry>,
}

static GLOBAL_CACHE_ROOT: OnceCell<PathBuf> = OnceCell::new();

/// Records the first base dir bound to a shared cache and reports whether
/// `base_dir` is that same root.
fn claim_cache_root(claimed: &OnceCell<PathBuf>, base_dir: &Path) -> bool {
    claimed.get_or_init(|| base_dir.to_path_buf()) == base_dir
}

impl ModelRegistry {
    /// Opens the registry backed by the process-wide artifact cache.
    ///
    /// The cache is keyed by `(name, version)` only, so a process should
    /// open one base dir through this constructor; use
    /// [`with_cache`](Self::with_cache) for anything else.
    pub fn open(config: RegistryConfig) -> Result<Self> {
        if !claim_cache_root(&GLOBAL_CACHE_ROOT, &config.base_dir) {
            tracing::warn!(
                base_dir = %config.base_dir.display(),
                cache_root = ?GLOBAL_CACHE_ROOT.get(),
                "process-wide artifact cache already serves another base dir; \
                 handles may alias across registries"
            );
        }
        Self::with_cache(config, ArtifactCache::global())
    }

    pub fn with_cache(config: RegistryConfig, cache: Arc<ArtifactCache>) -> Result<Self> {
        let metadata = MetadataStore::new(config.metadata_path());
        let artifacts = ArtifactStore::new(&config.base_dir, config.models_dir.clone());
        let journal = config
            .journal
            .then(|| Journal::new(config.journal_path()));
        let registry = metadata.load()?;
        tracing::info!(
            base_dir = %config.base_dir.display(),
            models = registry.models.len(),
            versions = registry.version_count(),
            "model registry opened"
        );
        Ok(Self {
            config,
            metadata,
            artifacts,
            cache,
            journal,
            writer: Mutex::new(()),
            state: RwLock::new(registry),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn register_model(
        &self,
        name: &str,
        version: &str,
        model_path: impl AsRef<Path>,
        metrics: IndexMap<String, f64>,
    ) -> Result<VersionRecord> {
        self.register(
            RegisterRequest::new(name, version, model_path.as_ref()).metrics(metrics),
        )
    }

    pub fn register(&self, request: RegisterRequest) -> Result<VersionRecord> {
        let RegisterRequest {
            name,
            version,
            source,
            metrics,
            metadata,
            overwrite_artifact,
        } = request;
        validate_model_name(&name)?;
        validate_version(&version)?;
        validate_metrics(&metrics)?;
        if !source.is_file() {
            return Err(RegistryError::validation(format!(
                "source model artifact not found: {}",
                source.display()
            )));
        }

        let guard = self.writer.lock();
        let mut next = self.state.read().clone();
        if next.contains(&name, &version) {
            return Err(RegistryError::DuplicateVersion { name, version });
        }

        let stored = self
            .artifacts
            .store(&name, &version, &source, overwrite_artifact)?;
        let record = VersionRecord {
            version: version.clone(),
            artifact_path: stored.relative_path,
            source_filename: stored.source_filename,
            size_bytes: stored.size_bytes,
            sha256: stored.sha256,
            metrics,
            metadata,
            created_at: now_utc_iso(),
        };

        // `next` is a private snapshot; the published aggregate only changes
        // once the file has been committed.
        let committed = next
            .insert(&name, record.clone())
            .and_then(|()| self.metadata.save(&next));
        if let Err(err) = committed {
            if let Err(cleanup) = self.artifacts.discard(&name, &version) {
                tracing::warn!(error = %cleanup, "failed to remove uncommitted artifact");
            }
            tracing::warn!(
                name = %name,
                version = %version,
                error = %err,
                "registration rolled back"
            );
            return Err(err);
        }
        *self.state.write() = next;
        drop(guard);

        tracing::info!(
            name = %name,
            version = %version,
            size_bytes = record.size_bytes,
            "model registered"
        );
        self.journal(
            "model_registered",
            [
                ("name", Value::String(name)),
                ("version", Value::String(version)),
                ("artifact_path", Value::String(record.artifact_path.clone())),
                ("sha256", Value::String(record.sha256.clone())),
            ],
        );
        Ok(record)
    }

    /// Returns the artifact handle, reading from disk only on a cold start.
    pub fn load_model(&self, name: &str, version: &str) -> Result<ArtifactHandle> {
        let artifact_path = self
            .state
            .read()
            .lookup(name, version)?
            .artifact_path
            .clone();
        self.cache.get_or_load(name, version, || -> Result<LoadedArtifact> {
            let started = Instant::now();
            let path = self.artifacts.resolve(&artifact_path)?;
            let bytes = self.artifacts.read(&path)?;
            tracing::info!(
                name = %name,
                version = %version,
                bytes = bytes.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "artifact loaded from disk"
            );
            Ok(LoadedArtifact {
                name: name.to_string(),
                version: version.to_string(),
                path,
                bytes,
            })
        })
    }

    /// Drops a cached handle so the next load re-reads the artifact.
    pub fn invalidate(&self, name: &str, version: &str) -> bool {
        let dropped = self.cache.invalidate(name, version);
        if dropped {
            self.journal(
                "cache_invalidated",
                [
                    ("name", Value::String(name.to_string())),
                    ("version", Value::String(version.to_string())),
                ],
            );
        }
        dropped
    }

    pub fn list_models(&self) -> Vec<ModelRecord> {
        self.state.read().models.values().cloned().collect()
    }

    pub fn get_model(&self, name: &str) -> Result<ModelRecord> {
        self.state
            .read()
            .model(name)
            .cloned()
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))
    }

    pub fn get_version(&self, name: &str, version: &str) -> Result<VersionRecord> {
        self.state.read().lookup(name, version).cloned()
    }

    pub fn latest_version(&self, name: &str) -> Result<VersionRecord> {
        let state = self.state.read();
        let model = state
            .model(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;
        model
            .latest()
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotFound {
                name: name.to_string(),
                version: "latest".to_string(),
            })
    }

    /// Absolute path of the stored artifact, or `None` when the pair is
    /// unknown or its file is gone.
    pub fn get_model_path(&self, name: &str, version: &str) -> Option<PathBuf> {
        let artifact_path = self
            .state
            .read()
            .version(name, version)?
            .artifact_path
            .clone();
        self.artifacts.resolve(&artifact_path).ok()
    }

    /// Re-hashes the stored artifact against the digest recorded at
    /// registration.
    pub fn verify(&self, name: &str, version: &str) -> Result<VersionRecord> {
        let record = self.get_version(name, version)?;
        let path = self.artifacts.resolve(&record.artifact_path)?;
        let (size_bytes, actual) = self.artifacts.digest(&path)?;
        if actual != record.sha256 || size_bytes != record.size_bytes {
            return Err(RegistryError::IntegrityMismatch {
                path,
                expected: record.sha256,
                actual,
            });
        }
        Ok(record)
    }

    /// Replaces the in-memory aggregate with the committed file.
    pub fn reload(&self) -> Result<()> {
        let _guard = self.writer.lock();
        let registry = self.metadata.load()?;
        *self.state.write() = registry;
        Ok(())
    }

    fn journal<const N: usize>(&self, event_type: &str, fields: [(&str, Value); N]) {
        let Some(journal) = &self.journal else {
            return;
        };
        let payload: JournalPayload = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        if let Err(err) = journal.append(event_type, payload) {
            tracing::warn!(event = event_type, error = %err, "journal append failed");
        }
    }
}
