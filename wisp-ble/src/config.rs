//! Engine configuration, persisted as `$WISP_HOME/config.json`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wisp_proto::{DEFAULT_ENCODINGS, Encoding};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not determine home directory, set WISP_HOME")]
    NoHome,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan: ScanConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Substring matched against advertised names
    pub name_filter: String,
    /// Safety bound after which a scan stops by itself
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Index into the adapters reported by the OS
    pub adapter: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            name_filter: "WISP".to_string(),
            timeout_secs: 12,
            connect_timeout_secs: 10,
            adapter: 0,
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for a terminal status after the credentials write
    pub status_deadline_secs: u64,
    /// Report `Timeout` instead of optimistic completion when the deadline fires
    pub strict_deadline: bool,
    /// Write encodings, in the order they are attempted
    pub encodings: Vec<Encoding>,
    /// Appended to the vendor fallback tier during negotiation
    pub extra_service_uuids: Vec<Uuid>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            status_deadline_secs: 30,
            strict_deadline: false,
            encodings: DEFAULT_ENCODINGS.to_vec(),
            extra_service_uuids: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn status_deadline(&self) -> Duration {
        Duration::from_secs(self.status_deadline_secs)
    }
}

/// `$WISP_HOME`, or `~/.wisp`
pub fn wisp_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("WISP_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|h| h.join(".wisp"))
        .ok_or(ConfigError::NoHome)
}

impl EngineConfig {
    /// Load `config.json` from `home`, writing the defaults when it does not exist yet
    pub fn load_or_init(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.json");
        if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            return serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path, source });
        }

        let config = Self::default();
        std::fs::create_dir_all(home).map_err(|source| ConfigError::Io {
            path: home.to_path_buf(),
            source,
        })?;
        let data = serde_json::to_string_pretty(&config)
            .map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        std::fs::write(&path, data).map_err(|source| ConfigError::Io { path, source })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_home(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wisp-config-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"session": {"status_deadline_secs": 5}}"#).unwrap();
        assert_eq!(config.session.status_deadline(), Duration::from_secs(5));
        assert_eq!(config.session.encodings, DEFAULT_ENCODINGS.to_vec());
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn first_load_seeds_file() {
        let home = temp_home("seed");
        let config = EngineConfig::load_or_init(&home).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(home.join("config.json").exists());

        std::fs::write(
            home.join("config.json"),
            r#"{"scan": {"name_filter": "ACME"}, "session": {"encodings": ["base64"]}}"#,
        )
        .unwrap();
        let config = EngineConfig::load_or_init(&home).unwrap();
        assert_eq!(config.scan.name_filter, "ACME");
        assert_eq!(config.session.encodings, vec![Encoding::Base64]);

        let _ = std::fs::remove_dir_all(&home);
    }

    #[test]
    fn broken_file_is_reported() {
        let home = temp_home("broken");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("config.json"), "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load_or_init(&home),
            Err(ConfigError::Parse { .. })
        ));
        let _ = std::fs::remove_dir_all(&home);
    }
}
