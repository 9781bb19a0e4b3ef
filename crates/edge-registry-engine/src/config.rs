use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_DIR: &str = "./data";
pub const DEFAULT_METADATA_FILE: &str = "registry.json";
pub const DEFAULT_MODELS_DIR: &str = "models";
pub const JOURNAL_FILE: &str = "events.jsonl";

pub const ENV_HOME: &str = "EDGE_REGISTRY_HOME";
pub const ENV_JOURNAL: &str = "EDGE_REGISTRY_JOURNAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub base_dir: PathBuf,
    pub metadata_file: String,
    pub models_dir: String,
    pub journal: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}

impl RegistryConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
            models_dir: DEFAULT_MODELS_DIR.to_string(),
            journal: true,
        }
    }

    pub fn from_env() -> Self {
        let mut config = non_empty_env(ENV_HOME)
            .map(Self::new)
            .unwrap_or_default();
        if let Some(flag) = non_empty_env(ENV_JOURNAL) {
            config.journal = parse_flag(&flag);
        }
        config
    }

    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal = enabled;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.base_dir.join(&self.metadata_file)
    }

    pub fn models_root(&self) -> PathBuf {
        self.base_dir.join(&self.models_dir)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.base_dir.join(JOURNAL_FILE)
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
