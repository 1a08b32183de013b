//! Configuration for the `docs` binary.
//!
//! Command-line values win over environment variables, which win over defaults.

use docs_core::UploadPolicy;
use std::path::PathBuf;

pub const STORE_DIR_VAR: &str = "DOCS_STORE_DIR";
pub const EQUIPMENT_VAR: &str = "DOCS_EQUIPMENT";
pub const EXTENSION_VAR: &str = "DOCS_UPLOAD_EXTENSION";

const DEFAULT_STORE_DIR: &str = "~/.equipment-docs";

/// Values given on the command line, which win over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub store_dir: Option<String>,
    pub equipment: Option<String>,
    pub extension: Option<String>,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one snapshot file per equipment
    pub store_dir: PathBuf,
    /// Equipment whose documents are managed
    pub equipment: String,
    pub upload_policy: UploadPolicy,
}

impl Config {
    /// Resolve configuration from command-line values and environment variables.
    ///
    /// - `DOCS_STORE_DIR`: store directory (supports ~ for home directory)
    /// - `DOCS_EQUIPMENT`: equipment id (required unless given on the command line)
    /// - `DOCS_UPLOAD_EXTENSION`: enforced upload extension, `none` to disable
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn resolve(
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let store_dir = overrides
            .store_dir
            .or_else(|| env(STORE_DIR_VAR))
            .unwrap_or_else(|| DEFAULT_STORE_DIR.to_string());

        let equipment = overrides
            .equipment
            .or_else(|| env(EQUIPMENT_VAR))
            .ok_or(ConfigError::MissingEquipment)?;
        let equipment = equipment.trim().to_string();
        if matches!(equipment.as_str(), "" | "." | "..") || equipment.contains(['/', '\\']) {
            return Err(ConfigError::InvalidEquipment(equipment));
        }

        let extension = overrides.extension.or_else(|| env(EXTENSION_VAR));
        let upload_policy = match extension.as_deref().map(str::trim) {
            None => UploadPolicy::default(),
            Some(ext) if ext.is_empty() || ext.eq_ignore_ascii_case("none") => UploadPolicy::any(),
            Some(ext) => UploadPolicy::with_extension(ext),
        };

        Ok(Self {
            store_dir: expand_tilde(&store_dir),
            equipment,
            upload_policy,
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No equipment selected: pass --equipment or set DOCS_EQUIPMENT")]
    MissingEquipment,

    #[error("Invalid equipment id '{0}'")]
    InvalidEquipment(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_command_line_wins_over_env() {
        let overrides = Overrides {
            store_dir: Some("/tmp/docs".into()),
            equipment: Some("pump-7".into()),
            extension: None,
        };
        let config = Config::resolve(
            overrides,
            env(&[(STORE_DIR_VAR, "/srv/docs"), (EQUIPMENT_VAR, "press-1")]),
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/docs"));
        assert_eq!(config.equipment, "pump-7");
        assert_eq!(config.upload_policy, UploadPolicy::default());
    }

    #[test]
    fn test_env_fallback() {
        let config = Config::resolve(
            Overrides::default(),
            env(&[
                (STORE_DIR_VAR, "/srv/docs"),
                (EQUIPMENT_VAR, "press-1"),
                (EXTENSION_VAR, "NONE"),
            ]),
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/srv/docs"));
        assert_eq!(config.equipment, "press-1");
        assert_eq!(config.upload_policy, UploadPolicy::any());
    }

    #[test]
    fn test_missing_equipment() {
        assert!(matches!(
            Config::resolve(Overrides::default(), env(&[])),
            Err(ConfigError::MissingEquipment)
        ));
    }

    #[test]
    fn test_equipment_must_be_a_plain_file_name() {
        for bad in ["", "  ", ".", "..", "a/b", "a\\b"] {
            let overrides = Overrides {
                equipment: Some(bad.into()),
                ..Overrides::default()
            };
            let result = Config::resolve(overrides, env(&[]));
            assert!(
                matches!(result, Err(ConfigError::InvalidEquipment(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_custom_extension() {
        let overrides = Overrides {
            equipment: Some("pump-7".into()),
            extension: Some(".DWG".into()),
            ..Overrides::default()
        };
        let config = Config::resolve(overrides, env(&[])).unwrap();
        assert_eq!(config.upload_policy, UploadPolicy::with_extension("dwg"));
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/docs"), home.join("docs"));
        }
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
