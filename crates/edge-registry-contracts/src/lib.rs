//! Shared data model and persistence primitives for the edge model registry.

pub mod error;
pub mod journal;
pub mod persist;
pub mod records;
pub mod validate;

pub use error::{ErrorKind, RegistryError, Result};
pub use records::{ModelRecord, Registry, VersionRecord, REGISTRY_SCHEMA_VERSION};
pub use validate::ReleaseVersion;
