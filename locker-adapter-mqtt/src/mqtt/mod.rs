//! MQTT protocol layer
//!
//! - `topics`: topic layout and inbound message parsing
//! - `payloads`: outbound JSON payloads
//! - `client`: publish seam and the rumqttc session

pub mod topics;
pub mod payloads;
pub mod client;

pub use topics::{InboundMessage, ProtocolError, Topics};
pub use payloads::StatusPayload;
pub use client::{
    InboundPublish, MemoryPublisher, MqttPublisher, MqttSession, Published, Publisher,
    TransportError,
};
