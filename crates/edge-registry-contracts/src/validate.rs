use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{RegistryError, Result};

pub const MAX_MODEL_NAME_LEN: usize = 128;

/// A `vMAJOR.MINOR.PATCH` release tag, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ReleaseVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

static RELEASE_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^v(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)$"));

impl FromStr for ReleaseVersion {
    type Err = RegistryError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || {
            RegistryError::validation(format!(
                "version '{raw}' does not match vMAJOR.MINOR.PATCH"
            ))
        };
        let pattern = RELEASE_PATTERN
            .as_ref()
            .map_err(|err| RegistryError::validation(format!("release pattern: {err}")))?;
        let captures = pattern.captures(raw).ok_or_else(invalid)?;
        let component = |idx: usize| -> Result<u64> {
            captures
                .get(idx)
                .and_then(|part| part.as_str().parse().ok())
                .ok_or_else(invalid)
        };
        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }
}

pub fn validate_version(version: &str) -> Result<ReleaseVersion> {
    version.parse()
}

/// Names become a directory component under `models/`, so anything that
/// could escape or alias that directory is rejected.
pub fn validate_model_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::validation("model name must not be empty"));
    }
    if name.len() > MAX_MODEL_NAME_LEN {
        return Err(RegistryError::validation(format!(
            "model name exceeds {MAX_MODEL_NAME_LEN} bytes"
        )));
    }
    if name.trim() != name {
        return Err(RegistryError::validation(format!(
            "model name '{name}' has leading or trailing whitespace"
        )));
    }
    if name == "." || name == ".." {
        return Err(RegistryError::validation(format!(
            "model name '{name}' is reserved"
        )));
    }
    if name
        .chars()
        .any(|ch| ch == '/' || ch == '\\' || ch.is_control())
    {
        return Err(RegistryError::validation(format!(
            "model name '{}' contains a path separator or control character",
            name.escape_debug()
        )));
    }
    Ok(())
}

pub fn validate_metrics(metrics: &IndexMap<String, f64>) -> Result<()> {
    for (key, value) in metrics {
        if key.is_empty() {
            return Err(RegistryError::validation("metric keys must not be empty"));
        }
        if !value.is_finite() {
            return Err(RegistryError::validation(format!(
                "metric '{key}' is not a finite number"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{validate_metrics, validate_model_name, validate_version, ReleaseVersion};
    use crate::error::ErrorKind;

    #[test]
    fn accepts_semantic_versions() -> anyhow::Result<()> {
        assert_eq!(validate_version("v1.0.0")?, ReleaseVersion::new(1, 0, 0));
        assert_eq!(validate_version("v10.20.3")?, ReleaseVersion::new(10, 20, 3));
        assert_eq!(validate_version("v0.0.0")?.to_string(), "v0.0.0");
        Ok(())
    }

    #[test]
    fn rejects_malformed_versions() {
        for raw in [
            "1.0", "latest", "1.0.0", "v1.0", "v1.0.0.0", "v1..0", "v01.0.0", "v1.0.0-rc1",
            "V1.0.0", "", "v", "v1.0.x", "v1.0.0\n", " v1.0.0", "v99999999999999999999.0.0",
        ] {
            let err = validate_version(raw).err();
            assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Validation), "{raw}");
        }
    }

    #[test]
    fn orders_numerically_not_lexically() -> anyhow::Result<()> {
        let small: ReleaseVersion = "v1.9.0".parse()?;
        let large: ReleaseVersion = "v1.10.0".parse()?;
        assert!(large > small);
        Ok(())
    }

    #[test]
    fn rejects_names_that_escape_models_dir() {
        let too_long = "x".repeat(129);
        for name in ["", ".", "..", "a/b", "a\\b", " lead", "trail ", "nul\0", too_long.as_str()] {
            let err = validate_model_name(name).err();
            assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Validation), "{name:?}");
        }
        assert!(validate_model_name("MobileNetV2_Quantized").is_ok());
        assert!(validate_model_name("resnet-50.int8").is_ok());
    }

    #[test]
    fn rejects_non_finite_metrics() {
        let mut metrics = IndexMap::new();
        metrics.insert("acc".to_string(), 0.9);
        assert!(validate_metrics(&metrics).is_ok());
        metrics.insert("loss".to_string(), f64::NAN);
        assert!(validate_metrics(&metrics).is_err());
    }
}
