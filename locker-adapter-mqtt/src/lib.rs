//! # Locker MQTT Adapter
//!
//! Exposes a simulated smart locker over MQTT.
//!
//! ## Architecture
//!
//! ```text
//! Locker backend
//!       │ MQTT (QoS 1)
//!       ▼
//! ┌─────────────────────────────────┐
//! │    locker-adapter-mqtt          │
//! │  ┌───────────┐  ┌────────────┐  │
//! │  │ MQTT      │─►│ Protocol   │  │
//! │  │ Session   │◄─│ Handler    │  │
//! │  └───────────┘  └────────────┘  │
//! │        ▲        ┌────────────┐  │
//! │        └────────│ Scheduler  │  │
//! │                 └────────────┘  │
//! └─────────────┬───────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────┐
//! │    locker-core                  │
//! │  State machine │ Box repository │
//! └─────────────────────────────────┘
//! ```
//!
//! ## Topics
//!
//! | Topic | Direction | Payload |
//! |-------|-----------|---------|
//! | `lockers/{id}/status` | publish | status telemetry |
//! | `lockers/{id}/request/boxes` | subscribe | trigger |
//! | `lockers/{id}/response/boxes` | publish | box records |
//! | `lockers/{id}/command/unlock/{box_id}` | subscribe | trigger |
//!
//! ## Usage
//!
//! ```no_run
//! use locker_adapter_mqtt::{Adapter, LockerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LockerConfig::new("slimlocker1").with_broker("localhost", 1883);
//!     let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//!
//!     let adapter = Adapter::new(config)?;
//!     adapter.run(stop_rx).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod mqtt;
pub mod locker;
pub mod config;
pub mod adapter;

pub use config::{ConfigError, LockerConfig, MqttConfig, SimulationConfig, TelemetryConfig};
pub use adapter::{Adapter, AdapterError};

pub use mqtt::{
    InboundMessage, InboundPublish, MemoryPublisher, MqttPublisher, MqttSession,
    ProtocolError, Publisher, StatusPayload, Topics, TransportError,
};
pub use locker::{ActivityScheduler, HandleOutcome, ProtocolHandler, TickReport};
