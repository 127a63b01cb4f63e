//! Service configuration
//!
//! Layering (later wins): built-in defaults, YAML file, `NIBESRV_` environment
//! variables (`__` separates nesting, e.g. `NIBESRV_MQTT__HOST`), command-line overrides.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NibeSrvError, Result};
use crate::protocol::constants::ADDRESS_MODBUS40;
use crate::registers::RegisterDirectory;

pub const DEFAULT_CONFIG_PATH: &str = "config/nibesrv.yaml";
pub const ENV_PREFIX: &str = "NIBESRV_";

pub const DEFAULT_NIBE_PORT: u16 = 9999;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MODEL: &str = "f370_f470";

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NibeSrvConfig {
    pub nibe: NibeConfig,
    pub mqtt: MqttConfig,
    pub alarm: AlarmConfig,
    pub logging: LoggingConfig,
}

/// Heat pump side: UDP relay endpoint and register catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NibeConfig {
    /// Address the UDP socket binds to
    pub host: String,
    pub port: u16,
    /// Built-in catalogue to use when `register_file` is not set
    pub model: String,
    /// CSV catalogue overriding the built-in one
    ///
    /// The built-in catalogues hold common registers only; data messages
    /// carrying anything else are dropped unanswered.
    pub register_file: Option<PathBuf>,
    /// Accessory address this node answers to
    pub bus_address: u8,
}

impl Default for NibeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_NIBE_PORT,
            model: DEFAULT_MODEL.to_string(),
            register_file: None,
            bus_address: ADDRESS_MODBUS40,
        }
    }
}

/// Message bus side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Root topic: requests on `<topic>/req/<name>`, results on `<topic>/res/<name>`
    pub topic: String,
    pub client_id: String,
    /// 0, 1 or 2
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Decoded values buffered between the poll loop and the publisher
    pub event_buffer: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_MQTT_PORT,
            topic: "nibe".to_string(),
            client_id: "nibesrv".to_string(),
            qos: 2,
            keep_alive_secs: 30,
            username: None,
            password: None,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Alarm register address, read once at startup
    pub register: u16,
    /// Queue a reset write when the alarm shows `reset_code`
    pub auto_reset: bool,
    pub reset_register: u16,
    pub reset_code: i64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            register: 45001,
            auto_reset: true,
            reset_register: 45171,
            reset_code: 251,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log root; files go to `<dir>/nibesrv/`. Console only when unset.
    pub dir: Option<String>,
    /// Write log files as JSON lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

impl NibeSrvConfig {
    /// Provider stack without command-line overrides
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(NibeSrvConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration; a missing file falls back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
        }
        Ok(Self::figment(path).extract()?)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        if self.nibe.port == 0 {
            return Err(NibeSrvError::config("nibe.port cannot be 0"));
        }
        if self.mqtt.port == 0 {
            return Err(NibeSrvError::config("mqtt.port cannot be 0"));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(NibeSrvError::config("mqtt.host cannot be empty"));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(NibeSrvError::config("mqtt.client_id cannot be empty"));
        }

        let topic = self.mqtt.topic.trim_end_matches('/');
        if topic.is_empty() {
            return Err(NibeSrvError::config("mqtt.topic cannot be empty"));
        }
        if topic.contains(['#', '+']) {
            return Err(NibeSrvError::config(format!(
                "mqtt.topic '{}' cannot contain wildcards",
                self.mqtt.topic
            )));
        }
        if self.mqtt.qos > 2 {
            return Err(NibeSrvError::config(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.mqtt.event_buffer == 0 {
            return Err(NibeSrvError::config("mqtt.event_buffer must be at least 1"));
        }
        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(NibeSrvError::config(
                "mqtt.username and mqtt.password must be set together",
            ));
        }

        let directory = self.load_directory()?;
        for name in [
            format!("alarm-{}", self.alarm.register),
            format!("alarm-reset-{}", self.alarm.reset_register),
        ] {
            directory.by_name(&name).map_err(|_| {
                NibeSrvError::config(format!(
                    "register {} not found in catalogue '{}'",
                    name,
                    directory.model()
                ))
            })?;
        }
        Ok(())
    }

    /// Register catalogue selected by `nibe.register_file` or `nibe.model`
    pub fn load_directory(&self) -> Result<RegisterDirectory> {
        let directory = match &self.nibe.register_file {
            Some(path) => RegisterDirectory::from_path(&self.nibe.model, path)?,
            None => RegisterDirectory::builtin(&self.nibe.model)?,
        };
        Ok(directory)
    }

    /// Root topic without trailing slash
    pub fn topic_root(&self) -> &str {
        self.mqtt.topic.trim_end_matches('/')
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = NibeSrvConfig::default();
        assert_eq!(config.nibe.port, 9999);
        assert_eq!(config.nibe.bus_address, 0x20);
        assert_eq!(config.mqtt.topic, "nibe");
        assert_eq!(config.mqtt.qos, 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = NibeSrvConfig::load(Path::new("absent.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(config, NibeSrvConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_yaml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nibesrv.yaml",
                r#"
nibe:
  port: 10000
mqtt:
  host: broker.local
  topic: heatpump
  qos: 1
alarm:
  auto_reset: false
"#,
            )?;
            jail.set_env("NIBESRV_MQTT__HOST", "10.0.0.5");
            jail.set_env("NIBESRV_LOGGING__LEVEL", "debug");

            let config =
                NibeSrvConfig::load(Path::new("nibesrv.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(config.nibe.port, 10000);
            assert_eq!(config.nibe.model, DEFAULT_MODEL);
            assert_eq!(config.mqtt.host, "10.0.0.5");
            assert_eq!(config.mqtt.topic, "heatpump");
            assert_eq!(config.mqtt.qos, 1);
            assert_eq!(config.mqtt.port, DEFAULT_MQTT_PORT);
            assert!(!config.alarm.auto_reset);
            assert_eq!(config.alarm.register, 45001);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/nibesrv.yaml");
        let config: NibeSrvConfig = Figment::from(Serialized::defaults(NibeSrvConfig::default()))
            .merge(Yaml::file(&path))
            .extract()
            .unwrap();
        assert_eq!(config, NibeSrvConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = NibeSrvConfig::default();
        config.mqtt.qos = 3;
        assert!(matches!(config.validate(), Err(NibeSrvError::ConfigError(_))));

        let mut config = NibeSrvConfig::default();
        config.mqtt.topic = "nibe/#".to_string();
        assert!(config.validate().is_err());

        let mut config = NibeSrvConfig::default();
        config.nibe.port = 0;
        assert!(config.validate().is_err());

        let mut config = NibeSrvConfig::default();
        config.mqtt.username = Some("user".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_checks_catalogue() {
        let mut config = NibeSrvConfig::default();
        config.nibe.model = "vvm320".to_string();
        assert!(matches!(config.validate(), Err(NibeSrvError::RegisterError(_))));

        let mut config = NibeSrvConfig::default();
        config.alarm.register = 45002;
        assert!(matches!(config.validate(), Err(NibeSrvError::ConfigError(_))));
    }

    #[test]
    fn test_register_file_overrides_model() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"address,name,title,size,factor,unit,writable,mappings\n45001,alarm-45001,Alarm,s16,1,,false,\n",
        )
        .unwrap();

        let mut config = NibeSrvConfig::default();
        config.nibe.register_file = Some(file.path().to_path_buf());
        let directory = config.load_directory().unwrap();
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_topic_root_strips_trailing_slash() {
        let mut config = NibeSrvConfig::default();
        config.mqtt.topic = "home/nibe/".to_string();
        assert_eq!(config.topic_root(), "home/nibe");
    }
}
