//! Runtime configuration.
//!
//! Values are layered: hardcoded defaults, then an optional TOML file, then
//! `RESERVOIR_*` environment variables (always win).

use std::path::Path;
use std::time::Duration;

use reservoir_core::constants::DEFAULT_AUTO_ADJUST_RATE;
use reservoir_core::constants::DEFAULT_COUNTER_WAIT_MS;
use reservoir_core::constants::DEFAULT_LOCK_LEASE_MS;
use reservoir_core::constants::DEFAULT_READ_LOCK_WAIT_MS;
use reservoir_core::constants::DEFAULT_WRITE_LOCK_WAIT_MS;
use reservoir_core::constants::MAX_AUTO_ADJUST_RATE;
use reservoir_core::constants::MAX_FORCE_SET_ATTEMPTS;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

/// Environment variable naming an explicit config file.
pub const CONFIG_FILE_ENV: &str = "RESERVOIR_CONFIG_FILE";

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("Invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue { key: String, value: String, reason: String },

    /// A required configuration value is missing.
    #[snafu(display("Missing required configuration: {key} ({hint})"))]
    MissingRequired { key: String, hint: String },
}

/// Tunables for the cache accessor and orchestrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Chance out of 10 that a low observation flags the resource for repair.
    pub auto_adjust_rate: u8,
    /// How long a counter acquire waits for permits.
    pub counter_wait_ms: u64,
    /// How long to wait for a resource read lock.
    pub read_lock_wait_ms: u64,
    /// How long to wait for a resource write lock during reinitialization.
    pub write_lock_wait_ms: u64,
    /// Lease bounding how long any resource lock may be held.
    pub lock_lease_ms: u64,
    /// Forced-set attempts before reinitialization gives up.
    pub force_set_attempts: u32,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            auto_adjust_rate: DEFAULT_AUTO_ADJUST_RATE,
            counter_wait_ms: DEFAULT_COUNTER_WAIT_MS,
            read_lock_wait_ms: DEFAULT_READ_LOCK_WAIT_MS,
            write_lock_wait_ms: DEFAULT_WRITE_LOCK_WAIT_MS,
            lock_lease_ms: DEFAULT_LOCK_LEASE_MS,
            force_set_attempts: MAX_FORCE_SET_ATTEMPTS,
        }
    }
}

impl ReservoirConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::InvalidValue {
            key: "config_file".to_string(),
            value: path.as_ref().display().to_string(),
            reason: format!("Failed to read file: {}", e),
        })?;

        Self::from_toml_str(&contents).map_err(|e| ConfigError::InvalidValue {
            key: "config_file".to_string(),
            value: path.as_ref().display().to_string(),
            reason: format!("Failed to parse TOML: {}", e),
        })
    }

    fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load configuration with the layered approach:
    /// 1. Start with defaults
    /// 2. Load `path`, or the file named by `RESERVOIR_CONFIG_FILE`, if given
    /// 3. Override with environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_FILE_ENV).ok();
        let path = path.map(Path::to_path_buf).or_else(|| env_path.map(Into::into));

        let mut config = match path {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading configuration file");
                Self::from_toml_file(&path)?
            }
            Some(path) => {
                return Err(ConfigError::MissingRequired {
                    key: "config_file".to_string(),
                    hint: format!("{} does not exist", path.display()),
                });
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RESERVOIR_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed by environment name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        macro_rules! apply_override {
            ($field:ident, $env:literal) => {
                if let Some(raw) = lookup($env) {
                    self.$field = parse_value($env, &raw)?;
                }
            };
        }

        apply_override!(auto_adjust_rate, "RESERVOIR_AUTO_ADJUST_RATE");
        apply_override!(counter_wait_ms, "RESERVOIR_COUNTER_WAIT_MS");
        apply_override!(read_lock_wait_ms, "RESERVOIR_READ_LOCK_WAIT_MS");
        apply_override!(write_lock_wait_ms, "RESERVOIR_WRITE_LOCK_WAIT_MS");
        apply_override!(lock_lease_ms, "RESERVOIR_LOCK_LEASE_MS");
        apply_override!(force_set_attempts, "RESERVOIR_FORCE_SET_ATTEMPTS");

        Ok(())
    }

    /// Reject values the accessor cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_adjust_rate > MAX_AUTO_ADJUST_RATE {
            return Err(invalid(
                "auto_adjust_rate",
                self.auto_adjust_rate,
                format!("must be between 0 and {MAX_AUTO_ADJUST_RATE}"),
            ));
        }
        for (key, value) in [
            ("counter_wait_ms", self.counter_wait_ms),
            ("read_lock_wait_ms", self.read_lock_wait_ms),
            ("write_lock_wait_ms", self.write_lock_wait_ms),
            ("lock_lease_ms", self.lock_lease_ms),
        ] {
            if value == 0 {
                return Err(invalid(key, value, "must be greater than zero".to_string()));
            }
        }
        if self.force_set_attempts == 0 {
            return Err(invalid("force_set_attempts", 0, "must be at least 1".to_string()));
        }
        Ok(())
    }

    // Duration getters for convenient access
    pub fn counter_wait(&self) -> Duration {
        Duration::from_millis(self.counter_wait_ms)
    }

    pub fn read_lock_wait(&self) -> Duration {
        Duration::from_millis(self.read_lock_wait_ms)
    }

    pub fn write_lock_wait(&self) -> Duration {
        Duration::from_millis(self.write_lock_wait_ms)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn invalid(key: &str, value: impl std::fmt::Display, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ReservoirConfig::default();
        config.validate().unwrap();
        assert_eq!(config.auto_adjust_rate, 3);
        assert_eq!(config.counter_wait(), Duration::from_millis(300));
        assert_eq!(config.force_set_attempts, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReservoirConfig::from_toml_str("auto_adjust_rate = 7\ncounter_wait_ms = 50\n").unwrap();
        assert_eq!(config.auto_adjust_rate, 7);
        assert_eq!(config.counter_wait_ms, 50);
        assert_eq!(config.lock_lease_ms, DEFAULT_LOCK_LEASE_MS);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_lock_wait_ms = 120").unwrap();
        writeln!(file, "write_lock_wait_ms = 450").unwrap();

        let config = ReservoirConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.read_lock_wait(), Duration::from_millis(120));
        assert_eq!(config.write_lock_wait(), Duration::from_millis(450));
    }

    #[test]
    fn test_from_toml_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auto_adjust_rate = \"lots\"").unwrap();

        let err = ReservoirConfig::from_toml_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "config_file"));
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = ReservoirConfig::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let mut config = ReservoirConfig::from_toml_str("auto_adjust_rate = 2").unwrap();
        config
            .apply_overrides(lookup(&[("RESERVOIR_AUTO_ADJUST_RATE", "9"), ("RESERVOIR_LOCK_LEASE_MS", " 5000 ")]))
            .unwrap();
        assert_eq!(config.auto_adjust_rate, 9);
        assert_eq!(config.lock_lease_ms, 5000);
    }

    #[test]
    fn test_unparseable_override_is_rejected() {
        let mut config = ReservoirConfig::default();
        let err = config.apply_overrides(lookup(&[("RESERVOIR_COUNTER_WAIT_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("RESERVOIR_COUNTER_WAIT_MS"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let config = ReservoirConfig {
            auto_adjust_rate: 11,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReservoirConfig {
            counter_wait_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReservoirConfig {
            force_set_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
