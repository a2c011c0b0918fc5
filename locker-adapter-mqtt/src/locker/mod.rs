//! Locker device behaviour on top of the MQTT layer
//!
//! - `handler`: inbound message dispatch and status/response publishing
//! - `scheduler`: periodic status and simulated box activity

pub mod handler;
pub mod scheduler;

pub use handler::{HandleOutcome, HandlerError, ProtocolHandler};
pub use scheduler::{Activity, ActivityScheduler, TickReport};
