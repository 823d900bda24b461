//! Engine configuration
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub playback: PlaybackConfig,
    pub matching: MatchingConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// The `engine:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Upper bound on pause/stop latency, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// The `playback:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_speed")]
    pub default_speed: f64,

    #[serde(default = "default_min_speed")]
    pub min_speed: f64,

    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

/// The `matching:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Confidence used by image lookups that do not give their own
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Timeout used by screen lookups that do not give their own
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

/// The `paths:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for relative recording sources
    #[serde(default = "default_recordings")]
    pub recordings: PathBuf,

    /// Base directory for relative template images
    #[serde(default = "default_templates")]
    pub templates: PathBuf,
}

/// The `logging:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. "info" or "mp_script=debug"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_speed() -> f64 {
    1.0
}

fn default_min_speed() -> f64 {
    0.1
}

fn default_max_speed() -> f64 {
    10.0
}

fn default_confidence() -> f64 {
    0.8
}

fn default_timeout_secs() -> f64 {
    10.0
}

fn default_recordings() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_templates() -> PathBuf {
    PathBuf::from("templates")
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_speed: default_speed(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            recordings: default_recordings(),
            templates: default_templates(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl PlaybackConfig {
    /// Clamp a requested speed into `[min_speed, max_speed]`
    ///
    /// Non-finite speeds fall back to the default speed.
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        if speed.is_finite() {
            speed.clamp(self.min_speed, self.max_speed)
        } else {
            self.default_speed
        }
    }
}

impl MatchingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl PathsConfig {
    /// Resolve a recording source against the recordings directory
    pub fn recording(&self, source: &str) -> String {
        join_relative(&self.recordings, source)
    }

    /// Resolve a template image against the templates directory
    pub fn template(&self, image: &str) -> String {
        join_relative(&self.templates, image)
    }
}

fn join_relative(base: &Path, reference: &str) -> String {
    let path = Path::new(reference);
    if path.is_absolute() || base.as_os_str().is_empty() {
        reference.to_string()
    } else {
        base.join(path).to_string_lossy().into_owned()
    }
}

impl EngineConfig {
    /// Load, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file = path.file_name().map(Path::new).unwrap_or(path);
        let yaml = load_yaml(dir, file)?;

        Self::from_yaml(&yaml)
    }

    /// Parse and validate an already loaded YAML document
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let config: EngineConfig = match yaml {
            Value::Null => EngineConfig::default(),
            Value::Mapping(_) => {
                serde_yaml::from_value(yaml.clone()).map_err(|e| ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: e.to_string(),
                })?
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.poll_interval_ms == 0 {
            return Err(invalid("engine.poll_interval_ms", "must be greater than 0"));
        }

        let playback = &self.playback;
        if playback.min_speed.is_nan() || playback.min_speed <= 0.0 {
            return Err(invalid("playback.min_speed", "must be greater than 0"));
        }
        if playback.min_speed > playback.max_speed {
            return Err(ConfigError::ValidationFailed {
                message: format!(
                    "playback.min_speed ({}) exceeds playback.max_speed ({})",
                    playback.min_speed, playback.max_speed
                ),
            });
        }
        if !(playback.min_speed..=playback.max_speed).contains(&playback.default_speed) {
            return Err(invalid(
                "playback.default_speed",
                "must lie between min_speed and max_speed",
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.confidence) {
            return Err(invalid("matching.confidence", "must lie between 0 and 1"));
        }
        if !self.matching.timeout_secs.is_finite() || self.matching.timeout_secs < 0.0 {
            return Err(invalid("matching.timeout_secs", "must be a finite, non-negative number"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.poll_interval_ms)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.poll_interval_ms, 100);
        assert_eq!(config.playback.default_speed, 1.0);
        assert_eq!(config.playback.min_speed, 0.1);
        assert_eq!(config.playback.max_speed, 10.0);
        assert_eq!(config.matching.confidence, 0.8);
        assert_eq!(config.matching.timeout_secs, 10.0);
        assert_eq!(config.paths.recordings, PathBuf::from("recordings"));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml: Value = serde_yaml::from_str(
            r#"
playback:
  max_speed: 4.0
matching:
  confidence: 0.95
"#,
        )
        .unwrap();

        let config = EngineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.playback.max_speed, 4.0);
        assert_eq!(config.playback.min_speed, 0.1);
        assert_eq!(config.matching.confidence, 0.95);
        assert_eq!(config.engine.poll_interval_ms, 100);
    }

    #[test]
    fn test_empty_document() {
        let config = EngineConfig::from_yaml(&Value::Null).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_not_a_mapping() {
        let yaml: Value = serde_yaml::from_str("- a\n- b\n").unwrap();
        assert!(matches!(
            EngineConfig::from_yaml(&yaml),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            "engine:\n  poll_interval_ms: 0\n",
            "playback:\n  min_speed: 0\n",
            "playback:\n  min_speed: 5\n  max_speed: 2\n",
            "playback:\n  default_speed: 20\n",
            "matching:\n  confidence: 1.5\n",
            "matching:\n  timeout_secs: -1\n",
        ];

        for case in cases {
            let yaml: Value = serde_yaml::from_str(case).unwrap();
            assert!(EngineConfig::from_yaml(&yaml).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_clamp_speed() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.clamp_speed(0.01), 0.1);
        assert_eq!(playback.clamp_speed(25.0), 10.0);
        assert_eq!(playback.clamp_speed(2.5), 2.5);
        assert_eq!(playback.clamp_speed(f64::NAN), 1.0);
    }

    #[test]
    fn test_relative_paths() {
        let paths = PathsConfig::default();
        assert_eq!(paths.template("ok.png"), "templates/ok.png");
        assert_eq!(paths.template("/abs/ok.png"), "/abs/ok.png");
        assert_eq!(paths.recording("login.json"), "recordings/login.json");
    }

    #[test]
    fn test_load_file_with_env_var() {
        std::env::set_var("MP_ENGINE_TEST_RECORDINGS", "/srv/recordings");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            b"paths:\n  recordings: !env_var MP_ENGINE_TEST_RECORDINGS\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.paths.recordings, PathBuf::from("/srv/recordings"));
        assert_eq!(config.logging.level, "debug");
    }
}
