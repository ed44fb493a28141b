//! Configuration loading for the dirsync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `DIRSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `DIRSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// 32-byte AES-256 key for bind-password encryption, provided base64
    /// encoded in `DIRSYNC_CRYPTO_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Scheduler-specific configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_scheduler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Caller-side timeout around one tenant's full sync.
    #[serde(default = "default_scheduler_sync_timeout_seconds")]
    pub sync_timeout_seconds: u64,

    /// Caller-side timeout around a connection test.
    #[serde(default = "default_scheduler_connection_test_timeout_seconds")]
    pub connection_test_timeout_seconds: u64,

    /// Base retry interval after a tenant's sync fails. Subsequent failures
    /// back off exponentially: `base * 2^failures`, capped at the maximum.
    #[serde(default = "default_scheduler_backoff_base_seconds")]
    pub backoff_base_seconds: u64,

    /// Upper bound for the failure backoff.
    #[serde(default = "default_scheduler_backoff_max_seconds")]
    pub backoff_max_seconds: u64,

    /// Random jitter factor applied to backoff (range 0.0-1.0).
    #[serde(default = "default_scheduler_backoff_jitter_factor")]
    pub backoff_jitter_factor: f64,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {error}")]
    EnvFileRead { path: String, error: String },
    #[error("DIRSYNC_CRYPTO_KEY is not valid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must be 32 bytes, got {length}")]
    InvalidCryptoKeyLength { length: usize },
    #[error("crypto key is required (set DIRSYNC_CRYPTO_KEY)")]
    MissingCryptoKey,
    #[error("database URL is not a valid URL: {error}")]
    InvalidDatabaseUrl { error: String },
    #[error("scheduler tick interval {value}s out of range (5-300)")]
    InvalidSchedulerTickInterval { value: u64 },
    #[error("sync timeout {value}s out of range (30-3600)")]
    InvalidSyncTimeout { value: u64 },
    #[error("backoff base {base}s exceeds backoff max {max}s")]
    InvalidBackoffBounds { base: u64, max: u64 },
    #[error("backoff jitter factor {value} out of range (0.0-1.0)")]
    InvalidBackoffJitter { value: f64 },
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_scheduler_tick_interval_seconds(),
            sync_timeout_seconds: default_scheduler_sync_timeout_seconds(),
            connection_test_timeout_seconds: default_scheduler_connection_test_timeout_seconds(),
            backoff_base_seconds: default_scheduler_backoff_base_seconds(),
            backoff_max_seconds: default_scheduler_backoff_max_seconds(),
            backoff_jitter_factor: default_scheduler_backoff_jitter_factor(),
        }
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/dirsync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_scheduler_tick_interval_seconds() -> u64 {
    30
}

fn default_scheduler_sync_timeout_seconds() -> u64 {
    300
}

fn default_scheduler_connection_test_timeout_seconds() -> u64 {
    30
}

fn default_scheduler_backoff_base_seconds() -> u64 {
    5
}

fn default_scheduler_backoff_max_seconds() -> u64 {
    900
}

fn default_scheduler_backoff_jitter_factor() -> f64 {
    0.1
}

impl SchedulerConfig {
    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 5 || self.tick_interval_seconds > 300 {
            return Err(ConfigError::InvalidSchedulerTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if self.sync_timeout_seconds < 30 || self.sync_timeout_seconds > 3600 {
            return Err(ConfigError::InvalidSyncTimeout {
                value: self.sync_timeout_seconds,
            });
        }

        if self.backoff_base_seconds > self.backoff_max_seconds {
            return Err(ConfigError::InvalidBackoffBounds {
                base: self.backoff_base_seconds,
                max: self.backoff_max_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter_factor) {
            return Err(ConfigError::InvalidBackoffJitter {
                value: self.backoff_jitter_factor,
            });
        }

        Ok(())
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings
    /// are missing or out of bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        url::Url::parse(&self.database_url).map_err(|e| ConfigError::InvalidDatabaseUrl {
            error: e.to_string(),
        })?;

        self.scheduler.validate()?;

        Ok(())
    }
}

/// Loads [`AppConfig`] from layered `.env` files plus process environment.
///
/// Order of precedence, lowest first: `.env`, `.env.<profile>`, then process
/// environment variables. Only `DIRSYNC_`-prefixed keys are considered.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration without running [`AppConfig::validate`].
    pub fn load_unvalidated(&self) -> Result<AppConfig, ConfigError> {
        let mut layered = BTreeMap::new();

        self.read_env_file(".env", &mut layered)?;

        let profile_hint = layered
            .get("PROFILE")
            .cloned()
            .unwrap_or_else(default_profile);
        self.read_env_file(&format!(".env.{profile_hint}"), &mut layered)?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("DIRSYNC_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let crypto_key = match layered.remove("CRYPTO_KEY") {
            Some(key_str) if !key_str.is_empty() => {
                use base64::{Engine as _, engine::general_purpose};
                let decoded = general_purpose::STANDARD.decode(&key_str).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?;
                Some(decoded)
            }
            _ => None,
        };

        let scheduler = SchedulerConfig {
            tick_interval_seconds: layered
                .remove("SCHEDULER_TICK_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_tick_interval_seconds),
            sync_timeout_seconds: layered
                .remove("SCHEDULER_SYNC_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_sync_timeout_seconds),
            connection_test_timeout_seconds: layered
                .remove("SCHEDULER_CONNECTION_TEST_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_connection_test_timeout_seconds),
            backoff_base_seconds: layered
                .remove("SCHEDULER_BACKOFF_BASE_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_backoff_base_seconds),
            backoff_max_seconds: layered
                .remove("SCHEDULER_BACKOFF_MAX_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_backoff_max_seconds),
            backoff_jitter_factor: layered
                .remove("SCHEDULER_BACKOFF_JITTER_FACTOR")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_backoff_jitter_factor),
        };

        Ok(AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            scheduler,
        })
    }

    fn read_env_file(
        &self,
        name: &str,
        layered: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        let path = self.base_dir.join(name);
        if !path.exists() {
            return Ok(());
        }

        let iter = dotenvy::from_path_iter(&path).map_err(|e| ConfigError::EnvFileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        for item in iter {
            let (key, value) = item.map_err(|e| ConfigError::EnvFileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
            if let Some(stripped) = key.strip_prefix("DIRSYNC_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.profile, "local");
        assert_eq!(config.scheduler.tick_interval_seconds, 30);
        assert_eq!(config.scheduler.sync_timeout_seconds, 300);
        assert_eq!(config.scheduler.connection_test_timeout_seconds, 30);
    }

    #[test]
    fn validate_requires_crypto_key() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCryptoKey)
        ));

        let mut config = AppConfig::default();
        config.crypto_key = Some(vec![0u8; 16]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCryptoKeyLength { length: 16 })
        ));

        config.crypto_key = Some(vec![0u8; 32]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_scheduler_bounds() {
        let mut config = AppConfig::default();
        config.crypto_key = Some(vec![0u8; 32]);

        config.scheduler.tick_interval_seconds = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSchedulerTickInterval { value: 1 })
        ));

        config.scheduler = SchedulerConfig {
            backoff_base_seconds: 1000,
            backoff_max_seconds: 500,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackoffBounds { .. })
        ));

        config.scheduler = SchedulerConfig {
            backoff_jitter_factor: 1.5,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackoffJitter { .. })
        ));
    }

    #[test]
    fn redacted_json_hides_crypto_key() {
        let mut config = AppConfig::default();
        config.crypto_key = Some(vec![42u8; 32]);

        let json = config.redacted_json().unwrap();
        assert!(json.contains("REDACTED"));
        assert!(!json.contains("42,"));
    }

    #[test]
    fn loader_reads_layered_env_files() {
        let dir = std::env::temp_dir().join(format!("dirsync-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(".env"),
            "DIRSYNC_PROFILE=staging\nDIRSYNC_LOG_LEVEL=debug\n",
        )
        .unwrap();
        std::fs::write(dir.join(".env.staging"), "DIRSYNC_DB_MAX_CONNECTIONS=3\n").unwrap();

        let config = ConfigLoader::with_base_dir(dir.clone())
            .load_unvalidated()
            .unwrap();
        assert_eq!(config.profile, "staging");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.db_max_connections, 3);

        let _ = std::fs::remove_dir_all(dir);
    }
}
