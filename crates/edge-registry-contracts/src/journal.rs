use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::error::{RegistryError, Result};
use crate::records::now_utc_iso;

pub type JournalPayload = Map<String, Value>;

/// Append-only writer for the registry's `events.jsonl`.
///
/// - default fields are `type` and `ts`
/// - caller payload is merged last
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct Journal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn append(&self, event_type: &str, payload: JournalPayload) -> Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| RegistryError::io(parent, err))?;
        }

        let mut line = serde_json::to_string(&event)
            .map_err(|err| RegistryError::io(path, err.into()))?;
        line.push('\n');
        let _guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| RegistryError::io(path, err))?;
        file.write_all(line.as_bytes())
            .map_err(|err| RegistryError::io(path, err))?;

        Ok(Value::Object(event))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{Journal, JournalPayload};

    #[test]
    fn append_writes_compact_jsonl_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let journal = Journal::new(&path);

        let mut payload = JournalPayload::new();
        payload.insert("name".to_string(), json!("M"));
        payload.insert("version".to_string(), json!("v1.0.0"));
        let emitted = journal.append("model_registered", payload)?;
        journal.append("cache_invalidated", JournalPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        assert_eq!(first, emitted);
        assert_eq!(first["type"], json!("model_registered"));
        assert_eq!(first["version"], json!("v1.0.0"));
        DateTime::parse_from_rfc3339(first["ts"].as_str().unwrap_or(""))?;

        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["type"], json!("cache_invalidated"));
        Ok(())
    }
}
