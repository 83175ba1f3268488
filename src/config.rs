//! Mender Configuration
//!
//! Loads and saves the mender configuration from `~/.mender/mender.json`.
//! The signing secret for the security layer is resolved here: the
//! `MENDER_SIGNING_SECRET` environment variable wins over the config
//! file, and there is no fallback default.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Config file name within the mender directory.
const CONFIG_FILENAME: &str = "mender.json";

/// Environment variable holding the token signing secret.
pub const SECRET_ENV: &str = "MENDER_SIGNING_SECRET";

/// Operational configuration for the self-repair pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MenderConfig {
    /// Root directory for incidents, snapshots, and the audit log.
    pub data_dir: String,
    /// Default destination directory for promoted modules.
    pub live_dir: String,
    /// Inspection severity below which no repair is attempted.
    pub severity_threshold: u8,
    /// Poll interval for continuous watch mode, in seconds.
    pub watch_interval_secs: u64,
    /// Concurrency bound for batch test fan-out.
    pub max_test_workers: usize,
    /// Number of standard workers (test/analyze/execute) in the pool.
    pub worker_count: usize,
    /// Number of wildcard workers (repair/execute/any) in the pool.
    pub hybrid_workers: usize,
    /// Hard ceiling on concurrent pool dispatches.
    pub max_pool_concurrency: usize,
    /// Interpreter used by the process sandbox adapter.
    pub python_bin: String,
    /// Default tracing filter when RUST_LOG is not set.
    pub log_level: String,
    /// Token signing secret. `MENDER_SIGNING_SECRET` takes precedence
    /// over this field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

impl Default for MenderConfig {
    fn default() -> Self {
        MenderConfig {
            data_dir: "~/.mender/data".to_string(),
            live_dir: "~/.mender/live".to_string(),
            severity_threshold: 4,
            watch_interval_secs: 60,
            max_test_workers: 100,
            worker_count: 100,
            hybrid_workers: 200,
            max_pool_concurrency: 300,
            python_bin: "python3".to_string(),
            log_level: "info".to_string(),
            signing_secret: None,
        }
    }
}

/// Returns the mender dot-directory: `~/.mender`.
pub fn get_mender_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".mender")
}

/// Returns the full path to the config file: `~/.mender/mender.json`.
pub fn get_config_path() -> PathBuf {
    get_mender_dir().join(CONFIG_FILENAME)
}

/// Load the mender config from disk.
///
/// Reads `~/.mender/mender.json` and merges unset fields with defaults.
/// Returns `None` if the config file does not exist or cannot be parsed.
pub fn load_config() -> Option<MenderConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: MenderConfig = serde_json::from_str(&contents).ok()?;

    // Merge defaults for unset fields
    let defaults = MenderConfig::default();

    if config.data_dir.is_empty() {
        config.data_dir = defaults.data_dir;
    }
    if config.live_dir.is_empty() {
        config.live_dir = defaults.live_dir;
    }
    if config.watch_interval_secs == 0 {
        config.watch_interval_secs = defaults.watch_interval_secs;
    }
    if config.max_test_workers == 0 {
        config.max_test_workers = defaults.max_test_workers;
    }
    if config.worker_count == 0 {
        config.worker_count = defaults.worker_count;
    }
    if config.max_pool_concurrency == 0 {
        config.max_pool_concurrency = defaults.max_pool_concurrency;
    }
    if config.python_bin.is_empty() {
        config.python_bin = defaults.python_bin;
    }
    if config.log_level.is_empty() {
        config.log_level = defaults.log_level;
    }

    Some(config)
}

/// Save the mender config to disk at `~/.mender/mender.json`.
///
/// Creates the mender directory with mode 0o700 if it does not exist.
/// The config file is written with mode 0o600 since it may contain the
/// signing secret.
pub fn save_config(config: &MenderConfig) -> Result<()> {
    let dir = get_mender_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create mender directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
///
/// If the path starts with `~`, the tilde is replaced with the user's home directory.
/// Otherwise the path is returned as-is.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

/// Resolve the token signing secret.
///
/// Order: `MENDER_SIGNING_SECRET` environment variable, then the
/// `signing_secret` config field. Absence is a hard failure - the
/// security layer must never start with an implicit default secret.
pub fn resolve_signing_secret(config: &MenderConfig) -> Result<String> {
    if let Ok(secret) = std::env::var(SECRET_ENV) {
        if !secret.is_empty() {
            return Ok(secret);
        }
    }

    if let Some(ref secret) = config.signing_secret {
        if !secret.is_empty() {
            return Ok(secret.clone());
        }
    }

    bail!(
        "No signing secret configured. Set {} or add signing_secret to {}",
        SECRET_ENV,
        get_config_path().display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn test_resolve_path_without_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }

    #[test]
    fn test_default_config_values() {
        let config = MenderConfig::default();
        assert_eq!(config.severity_threshold, 4);
        assert_eq!(config.watch_interval_secs, 60);
        assert_eq!(config.max_test_workers, 100);
        assert_eq!(config.worker_count, 100);
        assert_eq!(config.hybrid_workers, 200);
        assert_eq!(config.max_pool_concurrency, 300);
        assert_eq!(config.python_bin, "python3");
        assert!(config.signing_secret.is_none());
    }

    #[test]
    fn test_partial_config_parses_and_merges() {
        let parsed: MenderConfig =
            serde_json::from_str(r#"{"severity_threshold": 6}"#).unwrap();
        assert_eq!(parsed.severity_threshold, 6);
        assert_eq!(parsed.data_dir, "~/.mender/data");
    }

    #[test]
    fn test_resolve_signing_secret_from_config_field() {
        let config = MenderConfig {
            signing_secret: Some("unit-test-secret".to_string()),
            ..MenderConfig::default()
        };
        // The env var may be absent in the test environment; the config
        // field must then be picked up.
        if std::env::var(SECRET_ENV).is_err() {
            let secret = resolve_signing_secret(&config).unwrap();
            assert_eq!(secret, "unit-test-secret");
        }
    }

    #[test]
    fn test_resolve_signing_secret_fails_without_any_source() {
        if std::env::var(SECRET_ENV).is_err() {
            let config = MenderConfig::default();
            assert!(resolve_signing_secret(&config).is_err());
        }
    }
}
