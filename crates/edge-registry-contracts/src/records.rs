use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::validate::ReleaseVersion;

pub const REGISTRY_SCHEMA_VERSION: u64 = 1;

/// One immutable release of a model. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    /// Relative to the registry base dir, `/`-separated.
    pub artifact_path: String,
    pub source_filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    #[serde(default)]
    pub metrics: IndexMap<String, f64>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    #[serde(default)]
    pub versions: IndexMap<String, VersionRecord>,
}

impl ModelRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: IndexMap::new(),
        }
    }

    /// Highest release by numeric ordering; entries whose tag does not
    /// parse (hand-edited files) are skipped.
    pub fn latest(&self) -> Option<&VersionRecord> {
        self.versions
            .values()
            .filter_map(|record| {
                record
                    .version
                    .parse::<ReleaseVersion>()
                    .ok()
                    .map(|parsed| (parsed, record))
            })
            .max_by_key(|(parsed, _)| *parsed)
            .map(|(_, record)| record)
    }
}

/// The aggregate root persisted as a whole on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub schema_version: u64,
    #[serde(default)]
    pub models: IndexMap<String, ModelRecord>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            schema_version: REGISTRY_SCHEMA_VERSION,
            models: IndexMap::new(),
        }
    }
}

impl Registry {
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.version(name, version).is_some()
    }

    pub fn model(&self, name: &str) -> Option<&ModelRecord> {
        self.models.get(name)
    }

    pub fn version(&self, name: &str, version: &str) -> Option<&VersionRecord> {
        self.models.get(name)?.versions.get(version)
    }

    pub fn lookup(&self, name: &str, version: &str) -> Result<&VersionRecord> {
        let model = self
            .models
            .get(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;
        model
            .versions
            .get(version)
            .ok_or_else(|| RegistryError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    /// Append-only: an existing `(name, version)` pair is never replaced.
    pub fn insert(&mut self, name: &str, record: VersionRecord) -> Result<()> {
        if self.contains(name, &record.version) {
            return Err(RegistryError::DuplicateVersion {
                name: name.to_string(),
                version: record.version,
            });
        }
        self.models
            .entry(name.to_string())
            .or_insert_with(|| ModelRecord::new(name))
            .versions
            .insert(record.version.clone(), record);
        Ok(())
    }

    pub fn version_count(&self) -> usize {
        self.models.values().map(|model| model.versions.len()).sum()
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::{json, Value};

    use super::{Registry, VersionRecord};
    use crate::error::ErrorKind;

    fn record(version: &str) -> VersionRecord {
        VersionRecord {
            version: version.to_string(),
            artifact_path: format!("models/M/{version}/artifact.bin"),
            source_filename: "model.bin".to_string(),
            size_bytes: 4,
            sha256: "00".repeat(32),
            metrics: IndexMap::from([("acc".to_string(), 0.9)]),
            metadata: IndexMap::new(),
            created_at: super::now_utc_iso(),
        }
    }

    #[test]
    fn insert_rejects_duplicate_pair() -> anyhow::Result<()> {
        let mut registry = Registry::default();
        registry.insert("M", record("v1.0.0"))?;
        let err = registry.insert("M", record("v1.0.0")).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::DuplicateVersion));
        assert_eq!(registry.version_count(), 1);
        Ok(())
    }

    #[test]
    fn lookup_distinguishes_model_and_version_misses() -> anyhow::Result<()> {
        let mut registry = Registry::default();
        registry.insert("M", record("v1.0.0"))?;
        assert_eq!(
            registry.lookup("N", "v1.0.0").err().map(|e| e.kind()),
            Some(ErrorKind::ModelNotFound)
        );
        assert_eq!(
            registry.lookup("M", "v2.0.0").err().map(|e| e.kind()),
            Some(ErrorKind::VersionNotFound)
        );
        assert_eq!(registry.lookup("M", "v1.0.0")?.version, "v1.0.0");
        Ok(())
    }

    #[test]
    fn latest_uses_numeric_order() -> anyhow::Result<()> {
        let mut registry = Registry::default();
        for version in ["v1.9.0", "v1.10.0", "v1.2.3"] {
            registry.insert("M", record(version))?;
        }
        let latest = registry.model("M").and_then(|model| model.latest());
        assert_eq!(latest.map(|r| r.version.as_str()), Some("v1.10.0"));
        Ok(())
    }

    #[test]
    fn serialized_shape_is_name_then_version_keyed() -> anyhow::Result<()> {
        let mut registry = Registry::default();
        registry.insert("M", record("v1.0.0"))?;
        let value = serde_json::to_value(&registry)?;
        assert_eq!(value["schema_version"], json!(1));
        assert_eq!(value["models"]["M"]["name"], json!("M"));
        let entry = &value["models"]["M"]["versions"]["v1.0.0"];
        assert_eq!(entry["metrics"], json!({"acc": 0.9}));
        assert_eq!(
            entry["artifact_path"],
            Value::String("models/M/v1.0.0/artifact.bin".to_string())
        );
        Ok(())
    }
}
