//! Service Bootstrap and Initialization
//!
//! Command-line parsing, configuration loading and logging setup.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use crate::config::{NibeSrvConfig, DEFAULT_CONFIG_PATH};
use crate::error::{NibeSrvError, Result};
use common::service_bootstrap::ServiceInfo;

pub use common::bootstrap_args::ServiceArgs;

/// Command-line arguments for nibesrv
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "nibesrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "NIBE MODBUS40 accessory gateway between the heat pump's UDP relay and MQTT",
    long_about = None
)]
pub struct Args {
    /// Configuration file
    #[arg(short = 'c', long, env = "NIBESRV_CONFIG")]
    pub config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// Root topic; subscribes to MQTT_TOPIC/req/#, publishes on MQTT_TOPIC/res/{name}
    #[arg(long)]
    pub mqtt_topic: Option<String>,

    /// UDP port receiving frames from the heat pump relay
    #[arg(long)]
    pub nibe_port: Option<u16>,

    /// Heat pump model selecting the built-in register catalogue
    #[arg(long)]
    pub nibe_model: Option<String>,

    /// CSV register catalogue overriding the model's built-in one
    #[arg(long)]
    pub register_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Apply command-line values on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut NibeSrvConfig) {
        if let Some(host) = &self.mqtt_host {
            config.mqtt.host = host.clone();
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(topic) = &self.mqtt_topic {
            config.mqtt.topic = topic.clone();
        }
        if let Some(port) = self.nibe_port {
            config.nibe.port = port;
        }
        if let Some(model) = &self.nibe_model {
            config.nibe.model = model.clone();
        }
        if let Some(path) = &self.register_file {
            config.nibe.register_file = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    /// Load, override and validate the configuration
    pub fn load_config(&self) -> Result<NibeSrvConfig> {
        let path = ServiceArgs::from(self.clone()).config_path(DEFAULT_CONFIG_PATH);
        let mut config = NibeSrvConfig::load(&path)?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            log_level: args.log_level.unwrap_or_else(|| "info".to_string()),
            config: args.config,
            no_color: args.no_color,
            validate: args.validate,
        }
    }
}

/// Initialize logging from the merged configuration
///
/// Log root directory priority:
/// 1. NIBESRV_LOG_DIR environment variable
/// 2. logging.dir from the configuration
/// 3. Console only
pub fn initialize_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    config: &NibeSrvConfig,
) -> Result<()> {
    let file_logging =
        std::env::var(common::logging::LOG_DIR_ENV).is_ok() || config.logging.dir.is_some();
    let log_dir = if file_logging {
        common::logging::init_log_root(config.logging.dir.as_deref());
        Some(common::logging::get_log_root().join(&service_info.name))
    } else {
        None
    };

    let log_config = common::logging::LogConfig {
        service_name: service_info.name.clone(),
        log_dir,
        console_level: common::logging::parse_level(&config.logging.level),
        file_level: tracing::Level::DEBUG,
        enable_json: config.logging.json,
        ansi: !args.no_color,
    };

    common::logging::init_with_config(log_config)
        .map_err(|e| NibeSrvError::internal(format!("Failed to init logging: {:#}", e)))?;
    Ok(())
}

/// Log the effective configuration
pub fn log_configuration(config: &NibeSrvConfig) {
    info!(
        "Heat pump: udp://{}:{} model={} bus address 0x{:02X}",
        config.nibe.host, config.nibe.port, config.nibe.model, config.nibe.bus_address
    );
    match &config.nibe.register_file {
        Some(path) => info!("Register catalogue: {}", path.display()),
        None => warn!(
            "Using the built-in {} catalogue (common registers only); \
             set nibe.register_file for the full register list",
            config.nibe.model
        ),
    }
    info!(
        "MQTT: {}:{} topic={} qos={}",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic, config.mqtt.qos
    );
}
