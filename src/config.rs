//! Configuration loading and types for asto.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the storage backend, lock defaults, and logging.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::lock::Expiration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Storage lock settings.
    #[serde(default)]
    pub lock: LockConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type.  Only `memory` ships with this crate.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Memory storage configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            memory: MemoryStorageConfig::default(),
        }
    }
}

/// Memory storage backend configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryStorageConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// Storage lock configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LockConfig {
    /// Lifetime of a lock proposal in seconds.  Absent means proposals
    /// never expire and must be released explicitly.
    #[serde(default)]
    pub expiration_seconds: Option<u64>,
}

impl LockConfig {
    /// Expiration for a lock taken now.
    pub fn expiration(&self) -> Expiration {
        match self.expiration_seconds {
            Some(secs) => Expiration::after(Duration::from_secs(secs)),
            None => Expiration::Never,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.memory.max_size_bytes, 0);
        assert_eq!(config.lock.expiration_seconds, None);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  backend: memory\n  memory:\n    max_size_bytes: 1024\nlock:\n  expiration_seconds: 30\nlogging:\n  format: json\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.memory.max_size_bytes, 1024);
        assert_eq!(config.lock.expiration_seconds, Some(30));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_empty_sections_use_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "storage: {{}}").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.backend, "memory");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_config("/nonexistent/asto.yaml").is_err());
    }

    #[test]
    fn test_lock_expiration() {
        assert_eq!(LockConfig::default().expiration(), Expiration::Never);
        let timed = LockConfig {
            expiration_seconds: Some(60),
        };
        match timed.expiration() {
            Expiration::At(instant) => assert!(instant > chrono::Utc::now()),
            Expiration::Never => panic!("expected timed expiration"),
        }
    }
}
