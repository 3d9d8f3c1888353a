//! Engine configuration.
//!
//! Loaded from the TOML file named by `AVALIAR_CONFIG` (defaults apply when
//! unset). `AVALIAR_AUDIT_DENIALS` overrides the denial-auditing flag.
//!
//! ```toml
//! audit_denials = true
//!
//! [scoring.weights]
//! individual = 40
//! team = 20
//! transversal = 20
//! technical = 20
//!
//! [permissions]
//! path = "matrix.toml"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::EngineError;
use crate::permissions::{MatrixDocument, PermissionMatrix};
use crate::scoring::ScoringPolicy;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "AVALIAR_CONFIG";
/// Environment variable overriding [`EngineConfig::audit_denials`].
pub const AUDIT_DENIALS_ENV: &str = "AVALIAR_AUDIT_DENIALS";

/// Errors raised while loading configuration or a permission matrix.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Where the permission matrix comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixSource {
    /// TOML or JSON file; relative paths resolve against the config file.
    Path { path: PathBuf },
    /// Matrix embedded in the configuration.
    Inline(MatrixDocument),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringPolicy,
    /// Built-in institutional matrix when absent.
    pub permissions: Option<MatrixSource>,
    /// Record denied attempts in the audit log.
    pub audit_denials: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            permissions: None,
            audit_denials: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a file, resolving a relative matrix path against its directory.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(MatrixSource::Path { path: matrix }) = &mut config.permissions {
            if matrix.is_relative() {
                if let Some(dir) = path.parent() {
                    *matrix = dir.join(&*matrix);
                }
            }
        }
        Ok(config)
    }

    /// Load from `AVALIAR_CONFIG` (or defaults), then apply env overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        if let Ok(raw) = std::env::var(AUDIT_DENIALS_ENV) {
            config.audit_denials = parse_flag(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{AUDIT_DENIALS_ENV} must be true or false, got {raw}"
                ))
            })?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Materialise the configured permission matrix.
    pub fn load_matrix(&self) -> Result<PermissionMatrix, ConfigError> {
        match &self.permissions {
            None => Ok(PermissionMatrix::institutional_default()),
            Some(MatrixSource::Path { path }) => PermissionMatrix::from_path(path),
            Some(MatrixSource::Inline(doc)) => PermissionMatrix::from_document(doc.clone()),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Action, Module};
    use avaliar_state::RoleId;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert!(config.audit_denials);
        assert!(config.permissions.is_none());
        assert_eq!(config.scoring, ScoringPolicy::default());
        assert_eq!(config.load_matrix().unwrap().roles().count(), 7);
    }

    #[test]
    fn test_bad_weights_rejected_at_load() {
        let err = EngineConfig::from_toml_str(
            r#"
            [scoring.weights]
            individual = 40
            team = 40
            transversal = 20
            technical = 20
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must sum to 100"));
    }

    #[test]
    fn test_inline_matrix() {
        let config = EngineConfig::from_toml_str(
            r#"
            audit_denials = false

            [permissions]
            hierarchical_scoping = false

            [[permissions.roles]]
            id = "auditor"
            grants = { audit_log = ["view"] }
            "#,
        )
        .unwrap();
        assert!(!config.audit_denials);
        let matrix = config.load_matrix().unwrap();
        let role = matrix.role(&RoleId::from("auditor")).unwrap();
        assert!(role.grants(Module::AuditLog, Action::View));
    }

    #[test]
    fn test_relative_matrix_path_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("matrix.json"),
            r#"{"roles": [{"id": "reader", "grants": {"reports": ["view"]}}]}"#,
        )
        .unwrap();
        let config_path = dir.path().join("avaliar.toml");
        std::fs::write(&config_path, "[permissions]\npath = \"matrix.json\"\n").unwrap();

        let config = EngineConfig::from_path(&config_path).unwrap();
        let matrix = config.load_matrix().unwrap();
        assert!(matrix.role(&RoleId::from("reader")).is_some());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
