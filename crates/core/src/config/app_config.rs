use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::traits::TransportOptions;
use crate::{VcError, VcResult};

/// Process-level configuration.
///
/// Keys follow the environment-style names used by the experiment scripts
/// (`MTBVF`, `NV`, `MQTT_BROKER`, ...); the `config` crate lower-cases them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// mean time between vehicle failures, seconds
    pub mtbvf: f64,
    /// mean vehicle repair time, seconds
    pub mtbvr: f64,
    /// mean time between rentals, seconds
    pub mtbr: f64,
    /// mean rental duration, seconds
    pub mtbrr: f64,
    /// mean time between broker failures, seconds
    pub mtbbf: f64,
    /// mean broker repair time, seconds
    pub mtbbr: f64,
    /// run length in seconds (one tick per second)
    pub runtime: u64,
    /// number of simulated vehicles
    pub nv: usize,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_keepalive: u64,
    pub seed: Option<u64>,
    /// job functions vehicles must support, checked at startup
    pub required_functions: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mtbvf: 1080.0,
            mtbvr: 0.36,
            mtbr: 8.64,
            mtbrr: 17.28,
            mtbbf: 720.0,
            mtbbr: 3.6,
            runtime: 3600,
            nv: 40,
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_keepalive: 60,
            seed: None,
            required_functions: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then environment variables.
    pub fn load(config_path: Option<&str>) -> VcResult<Self> {
        let defaults = Self::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("mtbvf", defaults.mtbvf)?
            .set_default("mtbvr", defaults.mtbvr)?
            .set_default("mtbr", defaults.mtbr)?
            .set_default("mtbrr", defaults.mtbrr)?
            .set_default("mtbbf", defaults.mtbbf)?
            .set_default("mtbbr", defaults.mtbbr)?
            .set_default("runtime", defaults.runtime)?
            .set_default("nv", defaults.nv as u64)?
            .set_default("mqtt_broker", defaults.mqtt_broker.clone())?
            .set_default("mqtt_port", u64::from(defaults.mqtt_port))?
            .set_default("mqtt_keepalive", defaults.mqtt_keepalive)?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(VcError::Configuration(format!(
                    "Config file not found: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("required_functions"),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> VcResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| VcError::Configuration(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VcResult<()> {
        let means = [
            ("MTBVF", self.mtbvf),
            ("MTBVR", self.mtbvr),
            ("MTBR", self.mtbr),
            ("MTBRR", self.mtbrr),
            ("MTBBF", self.mtbbf),
            ("MTBBR", self.mtbbr),
        ];
        for (key, value) in means {
            if !value.is_finite() || value <= 0.0 {
                return Err(VcError::Configuration(format!(
                    "{key} must be a positive number, got {value}"
                )));
            }
        }
        if self.runtime == 0 {
            return Err(VcError::Configuration(
                "RUNTIME must be at least one second".to_string(),
            ));
        }
        if self.nv == 0 {
            return Err(VcError::Configuration(
                "NV must be at least one vehicle".to_string(),
            ));
        }
        if self.mqtt_broker.trim().is_empty() {
            return Err(VcError::Configuration("MQTT_BROKER is empty".to_string()));
        }
        if self.mqtt_port == 0 {
            return Err(VcError::Configuration("MQTT_PORT must not be 0".to_string()));
        }
        if self.mqtt_keepalive < 5 {
            return Err(VcError::Configuration(
                "MQTT_KEEPALIVE must be at least 5 seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            host: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            keep_alive: Duration::from_secs(self.mqtt_keepalive),
            persistent_session: true,
        }
    }
}
