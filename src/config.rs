//! Host configuration.

use crate::error::{MicroAppError, Result};
use serde::Deserialize;
use std::path::Path;

/// Configuration for a micro-app host.
///
/// Every field is optional in TOML; missing fields take the defaults below.
///
/// ```toml
/// max_heap_size = 134217728
/// fetch_timeout_ms = 10000
/// allowed_origins = ["https://api.example.com"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Maximum V8 heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Per-request timeout for document and resource fetches (default: 30000ms)
    pub fetch_timeout_ms: Option<u64>,
    /// Origins micro-app scripts may `fetch()` (empty = fetch disabled)
    pub allowed_origins: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_heap_size: Some(64 * 1024 * 1024),
            fetch_timeout_ms: Some(30_000),
            allowed_origins: vec![],
        }
    }
}

impl HostConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MicroAppError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MicroAppError::Config(format!("failed to read '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(HostConfig::from_toml_str("").unwrap(), HostConfig::default());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = HostConfig::from_toml_str(
            r#"
            allowed_origins = ["http://localhost:3000"]
            fetch_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.fetch_timeout_ms, Some(500));
        assert_eq!(config.max_heap_size, Some(64 * 1024 * 1024));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = HostConfig::from_toml_str("chunks_dir = \"./dist\"").unwrap_err();
        assert!(matches!(err, MicroAppError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "max_heap_size = 1024").unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.max_heap_size, Some(1024));

        let missing = HostConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("failed to read"));
    }
}
