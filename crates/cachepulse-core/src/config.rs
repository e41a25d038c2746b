//! Configuration management for cachepulse.
//!
//! Handles loading and validation of cachepulse.toml configuration files.
//! Every section carries serde defaults so a minimal config (or none at
//! all) still resolves to something runnable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Stale-transfer reaper settings
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Consistency guardian settings
    #[serde(default)]
    pub guardian: GuardianConfig,

    /// Speed probe supervisor settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Configured datasources (log sources transfers are attributed to)
    #[serde(default, rename = "datasource")]
    pub datasources: Vec<Datasource>,
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (pretty or json)
    #[serde(default)]
    pub log_format: LogFormat,

    /// SQLite database file path
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            store_path: default_store_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/cachepulse/cachepulse.db")
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output for interactive use
    #[default]
    Pretty,
    /// JSON lines for ops pipelines
    Json,
}

/// Stale-transfer reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Sweep cadence in seconds
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,

    /// Elapsed quiet time after which an active transfer is presumed done
    #[serde(default = "default_quiet_threshold")]
    pub quiet_threshold_secs: u64,

    /// Rows finalized per write batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between full batches, milliseconds
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reaper_interval(),
            quiet_threshold_secs: default_quiet_threshold(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

fn default_reaper_interval() -> u64 {
    5
}

fn default_quiet_threshold() -> u64 {
    15
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_pause_ms() -> u64 {
    50
}

/// Consistency guardian configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Sweep cadence in seconds (much slower than the reaper)
    #[serde(default = "default_guardian_interval")]
    pub interval_secs: u64,

    /// Path to the probe's scan report (service inventory). Defaults to
    /// `scan_report.json` next to the store.
    #[serde(default)]
    pub scan_report_path: Option<PathBuf>,

    /// How long a cached inventory read stays fresh, seconds
    #[serde(default = "default_inventory_ttl")]
    pub inventory_ttl_secs: u64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_guardian_interval(),
            scan_report_path: None,
            inventory_ttl_secs: default_inventory_ttl(),
        }
    }
}

fn default_guardian_interval() -> u64 {
    300
}

fn default_inventory_ttl() -> u64 {
    60
}

/// Speed probe supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Path to the probe executable
    #[serde(default = "default_probe_executable")]
    pub executable: PathBuf,

    /// Fixed restart delay after a crash, seconds
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_secs: u64,

    /// Measurement window length reported in the default snapshot, seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            executable: default_probe_executable(),
            restart_backoff_secs: default_restart_backoff(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_probe_executable() -> PathBuf {
    PathBuf::from("/usr/local/bin/cachepulse-probe")
}

fn default_restart_backoff() -> u64 {
    5
}

fn default_window_seconds() -> u64 {
    2
}

/// A configured log source that transfers are attributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    /// Canonical name (exact casing is authoritative)
    pub name: String,

    /// Whether this datasource is currently enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding this datasource's access logs
    pub log_dir: PathBuf,

    /// Whether this is the designated default datasource
    #[serde(default)]
    pub default: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<String> = Vec::new();
        for ds in &self.datasources {
            let folded = ds.name.to_lowercase();
            if seen.contains(&folded) {
                return Err(ConfigError::DuplicateDatasource {
                    name: ds.name.clone(),
                });
            }
            seen.push(folded);

            if ds.log_dir.as_os_str().is_empty() {
                return Err(ConfigError::EmptyLogDir {
                    name: ds.name.clone(),
                });
            }
        }

        if self.datasources.iter().filter(|ds| ds.default).count() > 1 {
            return Err(ConfigError::MultipleDefaults);
        }

        Ok(())
    }

    /// The designated default datasource, if one is configured.
    #[must_use]
    pub fn default_datasource(&self) -> Option<&Datasource> {
        self.datasources.iter().find(|ds| ds.default)
    }

    /// Datasources that are currently enabled.
    #[must_use]
    pub fn enabled_datasources(&self) -> Vec<&Datasource> {
        self.datasources.iter().filter(|ds| ds.enabled).collect()
    }

    /// Resolved scan report path (explicit setting, or next to the store).
    #[must_use]
    pub fn scan_report_path(&self) -> PathBuf {
        self.guardian.scan_report_path.clone().unwrap_or_else(|| {
            self.general
                .store_path
                .parent()
                .map_or_else(|| PathBuf::from("scan_report.json"), Path::to_path_buf)
                .join("scan_report.json")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ds(name: &str, enabled: bool, default: bool) -> Datasource {
        Datasource {
            name: name.to_string(),
            enabled,
            log_dir: PathBuf::from("/logs").join(name),
            default,
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.reaper.quiet_threshold_secs, 15);
        assert_eq!(config.reaper.batch_size, 10);
        assert_eq!(config.probe.restart_backoff_secs, 5);
        assert_eq!(config.probe.window_seconds, 2);
        config.validate().unwrap();
    }

    #[test]
    fn case_folded_name_collision_is_rejected() {
        let config = Config {
            datasources: vec![ds("Cache", true, true), ds("cache", true, false)],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateDatasource { .. })
        ));
    }

    #[test]
    fn multiple_defaults_rejected() {
        let config = Config {
            datasources: vec![ds("a", true, true), ds("b", true, true)],
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MultipleDefaults)
        ));
    }

    #[test]
    fn enabled_and_default_accessors() {
        let config = Config {
            datasources: vec![ds("a", true, false), ds("b", false, true)],
            ..Config::default()
        };
        assert_eq!(config.enabled_datasources().len(), 1);
        assert_eq!(config.default_datasource().unwrap().name, "b");
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[general]
store_path = "/tmp/cp.db"

[reaper]
quiet_threshold_secs = 30

[[datasource]]
name = "primary"
log_dir = "/logs/primary"
default = true

[[datasource]]
name = "secondary"
log_dir = "/logs/secondary"
enabled = false
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.reaper.quiet_threshold_secs, 30);
        assert_eq!(config.datasources.len(), 2);
        assert_eq!(config.default_datasource().unwrap().name, "primary");
        assert!(!config.datasources[1].enabled);
    }

    #[test]
    fn scan_report_defaults_next_to_store() {
        let config = Config {
            general: GeneralConfig {
                store_path: PathBuf::from("/data/cachepulse.db"),
                ..GeneralConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(
            config.scan_report_path(),
            PathBuf::from("/data/scan_report.json")
        );
    }
}
