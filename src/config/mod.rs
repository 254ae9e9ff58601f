//! Configuration management

use crate::domain::audio::AudioOutput;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides, e.g. `CALLCORE__DTMF__RETRY_DELAY_MS`
pub const ENV_PREFIX: &str = "CALLCORE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub modem: ModemConfig,
    pub dtmf: DtmfConfig,
    pub hold: HoldConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Object path prefix of calls created by the simulated modem
    pub path_prefix: String,
    /// Whether the simulated modem reports network registration on attach
    pub registered: bool,
    /// Numbers that may be dialed without network registration
    pub emergency_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmfConfig {
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldConfig {
    /// Delay before re-issuing a swap that failed with "in progress"
    pub swap_retry_delay_ms: u64,
    pub answer_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub route_revert_delay_ms: u64,
    pub speaker_mode: bool,
    pub outputs: Vec<AudioOutput>,
    /// Drive display power from the audio route
    pub proximity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/ril_0".to_string(),
            registered: true,
            emergency_numbers: vec!["112".to_string(), "911".to_string()],
        }
    }
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
        }
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            swap_retry_delay_ms: 2000,
            answer_retry_delay_ms: 1000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            route_revert_delay_ms: 500,
            speaker_mode: false,
            outputs: vec![AudioOutput::Earpiece, AudioOutput::Speaker],
            proximity: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9100".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `CALLCORE__*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl DtmfConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl HoldConfig {
    pub fn swap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.swap_retry_delay_ms)
    }

    pub fn answer_retry_delay(&self) -> Duration {
        Duration::from_millis(self.answer_retry_delay_ms)
    }
}

impl AudioConfig {
    pub fn route_revert_delay(&self) -> Duration {
        Duration::from_millis(self.route_revert_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.dtmf.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.hold.swap_retry_delay(), Duration::from_secs(2));
        assert_eq!(config.audio.route_revert_delay(), Duration::from_millis(500));
        assert_eq!(config.modem.emergency_numbers, vec!["112", "911"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [dtmf]
            retry_delay_ms = 250

            [audio]
            speaker_mode = true
            outputs = ["earpiece", "bluetooth"]
            "#,
        )
        .unwrap();

        assert_eq!(config.dtmf.retry_delay_ms, 250);
        assert!(config.audio.speaker_mode);
        assert_eq!(
            config.audio.outputs,
            vec![AudioOutput::Earpiece, AudioOutput::Bluetooth]
        );
        assert_eq!(config.hold.answer_retry_delay_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rendered_config_lists_sections() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[dtmf]"));
        assert!(rendered.contains("retry_delay_ms = 1000"));
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.modem.path_prefix, "/ril_0");
    }
}
