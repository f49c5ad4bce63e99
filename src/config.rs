use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::SimulatedDevice;
use crate::server::ServerConfig;
use crate::types::InputRange;

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "daq-bridge.toml";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub sampling: SamplingSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// How long a request waits in the device queue before `busy`
    pub lock_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceSettings {
    pub name: String,
    pub serial: String,
    pub channel_count: u16,
    pub max_rate: f64,
    pub max_samples: usize,
    pub acquire_timeout_ms: u64,
    pub realtime: bool,
    pub ranges: Vec<InputRange>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SamplingSettings {
    /// Server-side cap on samples per channel, below the device maximum
    pub max_count: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
            max_connections: server.max_connections,
            lock_timeout_ms: 10_000,
            idle_timeout_ms: server.idle_timeout.as_millis() as u64,
            write_timeout_ms: server.write_timeout.as_millis() as u64,
            max_frame_bytes: server.max_frame_bytes,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "Simulated USB-1608FS".to_string(),
            serial: "SIM-0001".to_string(),
            channel_count: 8,
            max_rate: 50_000.0,
            max_samples: 100_000,
            acquire_timeout_ms: 5_000,
            realtime: true,
            ranges: vec![
                InputRange::Bip10Volts,
                InputRange::Bip5Volts,
                InputRange::Bip2Volts,
                InputRange::Bip1Volts,
            ],
        }
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self { max_count: 50_000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Message(msg.to_string()));
        let s = &self.server;
        if s.max_connections == 0 {
            return fail("server.max_connections must be at least 1");
        }
        if s.lock_timeout_ms == 0 || s.idle_timeout_ms == 0 || s.write_timeout_ms == 0 {
            return fail("server timeouts must be non-zero");
        }
        if s.max_frame_bytes == 0 {
            return fail("server.max_frame_bytes must be non-zero");
        }

        let d = &self.device;
        if d.channel_count == 0 {
            return fail("device.channel_count must be at least 1");
        }
        if !d.max_rate.is_finite() || d.max_rate <= 0.0 {
            return fail("device.max_rate must be positive");
        }
        if d.max_samples == 0 || d.acquire_timeout_ms == 0 {
            return fail("device.max_samples and device.acquire_timeout_ms must be non-zero");
        }
        if d.ranges.is_empty() {
            return fail("device.ranges must list at least one input range");
        }

        if self.sampling.max_count == 0 {
            return fail("sampling.max_count must be non-zero");
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_connections: self.server.max_connections,
            idle_timeout: Duration::from_millis(self.server.idle_timeout_ms),
            write_timeout: Duration::from_millis(self.server.write_timeout_ms),
            max_frame_bytes: self.server.max_frame_bytes,
            ..ServerConfig::default()
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.server.lock_timeout_ms)
    }

    pub fn simulated_device(&self) -> SimulatedDevice {
        let d = &self.device;
        SimulatedDevice::builder()
            .name(&d.name)
            .serial(&d.serial)
            .channel_count(d.channel_count)
            .max_rate(d.max_rate)
            .max_samples(d.max_samples)
            .ranges(d.ranges.clone())
            .realtime(d.realtime)
            .acquire_timeout(Duration::from_millis(d.acquire_timeout_ms))
            .build()
    }
}

/// Load configuration from file with layered fallbacks
///
/// Defaults, then the TOML file, then `DAQ_BRIDGE__SECTION__KEY`
/// environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
        builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
    }

    builder = builder.add_source(
        Environment::with_prefix("DAQ_BRIDGE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration, falling back to defaults when it cannot be read
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("daq-bridge-{}-{name}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 65432);
        assert_eq!(config.lock_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = write_config(
            "override",
            r#"
[server]
port = 7000
max_connections = 2

[device]
channel_count = 4
"#,
        );
        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server_config().max_connections, 2);
        assert_eq!(config.device.channel_count, 4);
        assert_eq!(config.sampling.max_count, 50_000);
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let path = write_config("invalid", "[device]\nchannel_count = 0\n");
        let result = load_config(Some(&path));
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/daq-bridge.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.server.lock_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.device.max_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sampling.max_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulated_device_follows_settings() {
        use crate::device::DeviceAdapter;

        let mut config = AppConfig::default();
        config.device.name = "bench unit".into();
        config.device.channel_count = 2;
        let info = config.simulated_device().info();
        assert_eq!(info.name, "bench unit");
        assert_eq!(info.channel_count, 2);
    }
}
