use std::io;
use std::path::{Path, PathBuf};

use edge_registry_contracts::persist::StagedWrite;
use edge_registry_contracts::{Registry, RegistryError, Result, REGISTRY_SCHEMA_VERSION};

/// Owns `registry.json`. The whole aggregate is rewritten on every save.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An absent file is an empty registry; a present but unparsable one is
    /// an error, never silently reset.
    pub fn load(&self) -> Result<Registry> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Registry::default());
            }
            Err(err) => return Err(RegistryError::io(&self.path, err)),
        };
        let registry: Registry =
            serde_json::from_slice(&raw).map_err(|err| self.corrupt(err.to_string()))?;
        if registry.schema_version > REGISTRY_SCHEMA_VERSION {
            return Err(self.corrupt(format!(
                "unsupported schema_version {} (max {REGISTRY_SCHEMA_VERSION})",
                registry.schema_version
            )));
        }
        for (key, model) in &registry.models {
            if key != &model.name {
                return Err(self.corrupt(format!(
                    "model key '{key}' does not match record name '{}'",
                    model.name
                )));
            }
            for (version_key, record) in &model.versions {
                if version_key != &record.version {
                    return Err(self.corrupt(format!(
                        "version key '{version_key}' of model '{key}' does not match record version '{}'",
                        record.version
                    )));
                }
            }
        }
        Ok(registry)
    }

    pub fn save(&self, registry: &Registry) -> Result<()> {
        self.stage(registry)?
            .commit()
            .map_err(|err| RegistryError::persistence(&self.path, err))?;
        tracing::debug!(
            path = %self.path.display(),
            versions = registry.version_count(),
            "registry metadata committed"
        );
        Ok(())
    }

    /// Serializes and fsyncs the aggregate next to the target without
    /// publishing it. Committing the returned write is the rename step.
    pub fn stage(&self, registry: &Registry) -> Result<StagedWrite> {
        let mut payload = serde_json::to_vec_pretty(registry)
            .map_err(|err| RegistryError::persistence(&self.path, err.into()))?;
        payload.push(b'\n');
        StagedWrite::stage(&self.path, &payload)
            .map_err(|err| RegistryError::persistence(&self.path, err))
    }

    fn corrupt(&self, reason: String) -> RegistryError {
        RegistryError::CorruptMetadata {
            path: self.path.clone(),
            reason,
        }
    }
}
