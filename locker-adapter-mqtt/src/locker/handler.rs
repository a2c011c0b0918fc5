//! Inbound message handling
//!
//! Maps decoded topic/payload pairs onto state machine operations and
//! publishes the results.
//!
//! ## Message Flow
//!
//! 1. `request/boxes` → read all boxes → publish `response/boxes`
//! 2. `command/unlock/{id}` → release box → publish `status` right away
//!
//! Every failure is logged and dropped here. Nothing propagates back to
//! the transport, so one bad message cannot stop the ones after it.
//!
//! Box reads and writes run on the blocking pool, and every publish is
//! bounded by `publish_timeout`.

use std::sync::Arc;
use std::time::Duration;

use locker_core::{BoxId, BoxStateMachine, StateError, Transition};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::TelemetryConfig;
use crate::mqtt::payloads::{box_records, encode};
use crate::mqtt::{InboundMessage, ProtocolError, Publisher, StatusPayload, Topics, TransportError};

/// Errors while serving one message or one status publication
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage task failed: {0}")]
    Blocking(String),
}

/// Default bound on a single publish
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a state machine operation on the blocking pool
pub(crate) async fn on_state<T, F>(state: &Arc<BoxStateMachine>, op: F) -> Result<T, HandlerError>
where
    T: Send + 'static,
    F: FnOnce(&BoxStateMachine) -> Result<T, StateError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || op(&state))
        .await
        .map_err(|e| HandlerError::Blocking(e.to_string()))?
        .map_err(HandlerError::from)
}

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Box list published
    BoxesSent { count: usize },
    /// Unlock applied; `status_sent` tells whether the follow-up status went out
    Unlocked {
        box_id: BoxId,
        transition: Transition,
        status_sent: bool,
    },
    /// Topic not handled by this locker
    Ignored { topic: String },
    /// Message dropped after an error
    Dropped { reason: String },
}

/// Protocol handler for one locker
pub struct ProtocolHandler {
    topics: Topics,
    state: Arc<BoxStateMachine>,
    publisher: Arc<dyn Publisher>,
    telemetry: TelemetryConfig,
    publish_timeout: Duration,
    rng: Mutex<StdRng>,
}

impl ProtocolHandler {
    pub fn new(
        topics: Topics,
        state: Arc<BoxStateMachine>,
        publisher: Arc<dyn Publisher>,
        telemetry: TelemetryConfig,
    ) -> Self {
        Self::with_rng(topics, state, publisher, telemetry, StdRng::from_entropy())
    }

    /// Handler with a deterministic temperature sequence
    pub fn with_seed(
        topics: Topics,
        state: Arc<BoxStateMachine>,
        publisher: Arc<dyn Publisher>,
        telemetry: TelemetryConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(topics, state, publisher, telemetry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        topics: Topics,
        state: Arc<BoxStateMachine>,
        publisher: Arc<dyn Publisher>,
        telemetry: TelemetryConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            topics,
            state,
            publisher,
            telemetry,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            rng: Mutex::new(rng),
        }
    }

    /// Bound each publish to `timeout`
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn state(&self) -> &Arc<BoxStateMachine> {
        &self.state
    }

    /// Handle one inbound message. Never fails.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> HandleOutcome {
        debug!(
            "Locker: Message received: topic={}, payload={}",
            topic,
            String::from_utf8_lossy(payload)
        );

        let message = match self.topics.parse(topic, payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Locker: Dropping message: {}", e);
                return HandleOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        };

        match message {
            InboundMessage::BoxRequest => match self.send_boxes().await {
                Ok(count) => HandleOutcome::BoxesSent { count },
                Err(e) => {
                    error!("Locker: Failed to answer box-data request: {}", e);
                    HandleOutcome::Dropped {
                        reason: e.to_string(),
                    }
                }
            },

            InboundMessage::UnlockCommand { box_id } => self.unlock(box_id).await,

            InboundMessage::Unrecognized { topic } => {
                debug!("Locker: Ignoring message on unhandled topic {}", topic);
                HandleOutcome::Ignored { topic }
            }
        }
    }

    /// Publish the full box list on the response topic
    pub async fn send_boxes(&self) -> Result<usize, HandlerError> {
        info!(
            "Locker: Request for box data received. Sending all box data for {}",
            self.topics.locker_id()
        );

        let boxes = on_state(&self.state, |sm| sm.boxes()).await?;
        let records = box_records(&boxes);
        let payload = encode(&records)?;
        self.publish(self.topics.box_response(), payload).await?;

        info!("Locker: Box data sent ({} boxes)", records.len());
        Ok(records.len())
    }

    async fn unlock(&self, box_id: BoxId) -> HandleOutcome {
        info!(
            "Locker: Simulating UNLOCK for box {} in locker {}",
            box_id,
            self.topics.locker_id()
        );

        let result = match on_state(&self.state, move |sm| sm.release(box_id)).await {
            Ok(result) => result,
            Err(HandlerError::State(StateError::NotFound(id))) => {
                warn!("Locker: Dropping unlock command: box {} does not exist", id);
                return HandleOutcome::Dropped {
                    reason: format!("box {} not found", id),
                };
            }
            Err(e) => {
                error!("Locker: Unlock of box {} failed: {}", box_id, e);
                return HandleOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        };

        // Observers should see the new fullness without waiting for the next tick
        let status_sent = match self.publish_status().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Locker: Status update after unlock of box {} failed: {}", box_id, e);
                false
            }
        };

        HandleOutcome::Unlocked {
            box_id,
            transition: result.transition,
            status_sent,
        }
    }

    /// Build a status payload from the current box state
    pub async fn status_payload(&self) -> Result<StatusPayload, HandlerError> {
        let is_full = on_state(&self.state, |sm| sm.locker_full()).await?;

        Ok(StatusPayload {
            locker_id: self.topics.locker_id().to_string(),
            is_full,
            status: self.telemetry.status_label.clone(),
            temperature_c: self.draw_temperature(),
            last_online: self.state.clock().now(),
        })
    }

    /// Publish a fresh status payload
    pub async fn publish_status(&self) -> Result<StatusPayload, HandlerError> {
        let status = self.status_payload().await?;
        self.publish(self.topics.status(), encode(&status)?).await?;

        info!(
            "Locker: {} status sent: Full={}, Temp={}°C",
            status.locker_id, status.is_full, status.temperature_c
        );
        Ok(status)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        match tokio::time::timeout(self.publish_timeout, self.publisher.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: format!("timed out after {:?}", self.publish_timeout),
            }),
        }
    }

    /// Uniform draw from the configured range, one decimal
    fn draw_temperature(&self) -> f64 {
        let (min, max) = (self.telemetry.min_temperature_c, self.telemetry.max_temperature_c);
        let raw = self.rng.lock().gen_range(min..=max);
        ((raw * 10.0).round() / 10.0).clamp(min, max)
    }
}
