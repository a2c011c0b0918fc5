//! Configuration for the locker adapter
//!
//! Combines settings for the MQTT session, box storage, the activity
//! simulation and status telemetry.

use std::path::PathBuf;
use std::time::Duration;

use locker_core::provision::DEFAULT_BOX_COUNT;
use locker_core::StorageConfig;
use thiserror::Error;

/// Invalid configuration values
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("locker id must not be empty")]
    EmptyLockerId,

    #[error("locker id {0:?} must not contain '/', '+' or '#'")]
    InvalidLockerId(String),

    #[error("{name} must be within [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("interval range is empty: {min:?} > {max:?}")]
    InvalidInterval { min: Duration, max: Duration },

    #[error("box count must be at least 1")]
    NoBoxes,

    #[error("temperature range is empty: {min} > {max}")]
    InvalidTemperatureRange { min: f64, max: f64 },
}

/// Complete adapter configuration
#[derive(Debug, Clone)]
pub struct LockerConfig {
    // Locker identity
    pub locker_id: String,

    // MQTT settings
    pub mqtt: MqttConfig,

    // Box record storage
    pub storage: StorageConfig,

    // Activity simulation
    pub simulation: SimulationConfig,

    // Status payload
    pub telemetry: TelemetryConfig,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

/// MQTT-specific configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name
    pub broker_host: String,

    /// Broker port
    pub broker_port: u16,

    /// Client id (defaults to `LockerClient_{locker_id}`)
    pub client_id: Option<String>,

    /// Optional credentials
    pub username: Option<String>,
    pub password: Option<String>,

    /// Keep-alive interval
    pub keep_alive: Duration,

    /// Time allowed for the initial CONNACK
    pub connect_timeout: Duration,

    /// Delay between reconnect attempts after a connection error
    pub reconnect_delay: Duration,

    /// Time allowed to flush DISCONNECT on shutdown
    pub disconnect_timeout: Duration,

    /// Longest wait for a single publish
    pub publish_timeout: Duration,

    /// Capacity of the client request and inbound message channels
    pub channel_capacity: usize,
}

/// Activity simulation settings
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Boxes created when the store is empty
    pub box_count: u32,

    /// Shortest pause between cycles
    pub min_interval: Duration,

    /// Longest pause between cycles
    pub max_interval: Duration,

    /// Chance per cycle of running an activity simulation
    pub activity_probability: f64,

    /// Chance that the picked box flips its occupancy
    pub flip_probability: f64,
}

/// Status payload settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Fixed `status` label
    pub status_label: String,

    /// Simulated temperature range in °C
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self::new("slimlocker1")
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "broker.hivemq.com".to_string(),
            broker_port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            channel_capacity: 64,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            box_count: DEFAULT_BOX_COUNT,
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(10),
            activity_probability: 0.5,
            flip_probability: 0.2,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            status_label: "Active".to_string(),
            min_temperature_c: 15.0,
            max_temperature_c: 30.0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.box_count == 0 {
            return Err(ConfigError::NoBoxes);
        }
        check_probability("activity_probability", self.activity_probability)?;
        check_probability("flip_probability", self.flip_probability)?;
        if self.min_interval > self.max_interval {
            return Err(ConfigError::InvalidInterval {
                min: self.min_interval,
                max: self.max_interval,
            });
        }
        Ok(())
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.min_temperature_c, self.max_temperature_c);
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(ConfigError::InvalidTemperatureRange { min, max });
        }
        Ok(())
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}

impl LockerConfig {
    /// Create config for a locker id, storing records under `./locker_{id}`
    pub fn new(locker_id: impl Into<String>) -> Self {
        let locker_id = locker_id.into();

        Self {
            storage: StorageConfig::new(format!("./locker_{}", locker_id)),
            locker_id,
            mqtt: MqttConfig::default(),
            simulation: SimulationConfig::default(),
            telemetry: TelemetryConfig::default(),
            seed: None,
        }
    }

    /// Client id used for the MQTT session
    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("LockerClient_{}", self.locker_id))
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locker_id.is_empty() {
            return Err(ConfigError::EmptyLockerId);
        }
        if self.locker_id.contains(['/', '+', '#']) {
            return Err(ConfigError::InvalidLockerId(self.locker_id.clone()));
        }
        self.simulation.validate()?;
        self.telemetry.validate()
    }

    /// Set broker address
    pub fn with_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.mqtt.broker_host = host.into();
        self.mqtt.broker_port = port;
        self
    }

    /// Set MQTT client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.mqtt.client_id = Some(client_id.into());
        self
    }

    /// Set broker credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.mqtt.username = Some(username.into());
        self.mqtt.password = Some(password.into());
        self
    }

    /// Set storage directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.dir = dir.into();
        self
    }

    /// Set number of boxes to provision
    pub fn with_box_count(mut self, count: u32) -> Self {
        self.simulation.box_count = count;
        self
    }

    /// Set pause range between scheduler cycles
    pub fn with_interval(mut self, min: Duration, max: Duration) -> Self {
        self.simulation.min_interval = min;
        self.simulation.max_interval = max;
        self
    }

    /// Set activity and flip probabilities
    pub fn with_probabilities(mut self, activity: f64, flip: f64) -> Self {
        self.simulation.activity_probability = activity;
        self.simulation.flip_probability = flip;
        self
    }

    /// Set simulated temperature range
    pub fn with_temperature_range(mut self, min_c: f64, max_c: f64) -> Self {
        self.telemetry.min_temperature_c = min_c;
        self.telemetry.max_temperature_c = max_c;
        self
    }

    /// Use a fixed RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LockerConfig::new("L1")
            .with_broker("localhost", 1884)
            .with_box_count(3)
            .with_probabilities(1.0, 0.0)
            .with_seed(9);

        assert_eq!(config.locker_id, "L1");
        assert_eq!(config.mqtt.broker_host, "localhost");
        assert_eq!(config.mqtt.broker_port, 1884);
        assert_eq!(config.simulation.box_count, 3);
        assert_eq!(config.storage.dir, PathBuf::from("./locker_L1"));
        assert_eq!(config.client_id(), "LockerClient_L1");
        assert_eq!(config.seed, Some(9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_simulator() {
        let config = LockerConfig::default();
        assert_eq!(config.simulation.activity_probability, 0.5);
        assert_eq!(config.simulation.flip_probability, 0.2);
        assert_eq!(config.simulation.min_interval, Duration::from_secs(5));
        assert_eq!(config.simulation.max_interval, Duration::from_secs(10));
        assert_eq!(config.telemetry.status_label, "Active");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let config = LockerConfig::new("L1").with_probabilities(1.5, 0.2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidProbability {
                name: "activity_probability",
                value: 1.5
            })
        );

        let config = LockerConfig::new("L1")
            .with_interval(Duration::from_secs(10), Duration::from_secs(5));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval { .. })));

        let config = LockerConfig::new("L1").with_box_count(0);
        assert_eq!(config.validate(), Err(ConfigError::NoBoxes));

        let config = LockerConfig::new("a/b");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLockerId(_))));

        let config = LockerConfig::new("L1").with_temperature_range(30.0, 10.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTemperatureRange { .. })
        ));
    }
}
