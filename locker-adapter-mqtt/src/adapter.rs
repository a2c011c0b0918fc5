//! Main locker adapter
//!
//! Wires box storage, the state machine, the protocol handler and the
//! scheduler to one MQTT session.
//!
//! ## Lifecycle
//!
//! 1. Open storage and provision boxes if the locker is new
//! 2. Connect to the broker and subscribe (failure is fatal)
//! 3. Dispatch inbound messages while the scheduler runs
//! 4. On shutdown: stop the scheduler, finish the current message,
//!    disconnect

use std::sync::Arc;

use locker_core::{
    provision_boxes, BoxRepository, BoxStateMachine, Clock, FileBoxRepository, StateError,
    StorageError, SystemClock,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, LockerConfig};
use crate::locker::{ActivityScheduler, ProtocolHandler};
use crate::mqtt::{InboundPublish, MqttSession, Publisher, Topics, TransportError};

/// Fatal adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The locker device
pub struct Adapter {
    config: LockerConfig,
    topics: Topics,
    state: Arc<BoxStateMachine>,
    clock: Arc<dyn Clock>,
}

impl Adapter {
    /// Create an adapter backed by the file repository and the system clock
    pub fn new(config: LockerConfig) -> Result<Self, AdapterError> {
        config.validate()?;
        let repo = FileBoxRepository::open(config.storage.clone())?;
        Self::with_parts(config, Arc::new(repo), Arc::new(SystemClock))
    }

    /// Create an adapter over an existing repository and clock
    pub fn with_parts(
        config: LockerConfig,
        repo: Arc<dyn BoxRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AdapterError> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let created = provision_boxes(repo.as_ref(), config.simulation.box_count, &mut rng)?;
        if created > 0 {
            info!("Locker: {} created {} boxes", config.locker_id, created);
        }

        let state = match config.seed {
            Some(seed) => BoxStateMachine::with_seed(repo, clock.clone(), seed.wrapping_add(1)),
            None => BoxStateMachine::new(repo, clock.clone()),
        };

        Ok(Self {
            topics: Topics::new(config.locker_id.clone()),
            config,
            state: Arc::new(state),
            clock,
        })
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<BoxStateMachine> {
        &self.state
    }

    /// Connect, serve until shutdown, then disconnect
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), AdapterError> {
        let boxes = self.state.boxes()?;
        info!(
            "Locker: Starting adapter: locker={}, boxes={}, broker={}:{}",
            self.config.locker_id,
            boxes.len(),
            self.config.mqtt.broker_host,
            self.config.mqtt.broker_port
        );

        let (session, inbound) = MqttSession::connect(
            &self.config.mqtt,
            &self.config.client_id(),
            self.topics.subscriptions(),
        )
        .await?;
        let publisher: Arc<dyn Publisher> = Arc::new(session.publisher());

        let result = self.serve(publisher, inbound, shutdown).await;

        if let Err(e) = session.disconnect().await {
            warn!("MQTT: Disconnect failed: {}", e);
        }

        result
    }

    /// Dispatch inbound messages and run the scheduler until shutdown.
    ///
    /// Transport-independent: `run` feeds it from the MQTT session, tests
    /// from a plain channel.
    pub async fn serve(
        &self,
        publisher: Arc<dyn Publisher>,
        mut inbound: mpsc::Receiver<InboundPublish>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AdapterError> {
        let handler = Arc::new(self.build_handler(publisher));
        let scheduler = self.build_scheduler(handler.clone())?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler_task = tokio::spawn(scheduler.run(stop_rx));

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Locker: Shutdown sender dropped");
                        break Ok(());
                    }
                }
                message = inbound.recv() => match message {
                    Some(message) => {
                        handler.handle(&message.topic, &message.payload).await;
                    }
                    None => {
                        error!("Locker: Inbound message stream closed");
                        break Err(AdapterError::Transport(TransportError::Closed));
                    }
                },
            }
        };

        info!("Locker: {} shutting down", self.config.locker_id);
        let _ = stop_tx.send(true);
        match scheduler_task.await {
            Ok(cycles) => debug!("Locker: Scheduler finished after {} cycles", cycles),
            Err(e) => warn!("Locker: Scheduler task failed: {}", e),
        }

        result
    }

    fn build_handler(&self, publisher: Arc<dyn Publisher>) -> ProtocolHandler {
        let telemetry = self.config.telemetry.clone();
        let handler = match self.config.seed {
            Some(seed) => ProtocolHandler::with_seed(
                self.topics.clone(),
                self.state.clone(),
                publisher,
                telemetry,
                seed.wrapping_add(2),
            ),
            None => ProtocolHandler::new(self.topics.clone(), self.state.clone(), publisher, telemetry),
        };
        handler.with_publish_timeout(self.config.mqtt.publish_timeout)
    }

    fn build_scheduler(&self, handler: Arc<ProtocolHandler>) -> Result<ActivityScheduler, ConfigError> {
        let simulation = self.config.simulation.clone();
        match self.config.seed {
            Some(seed) => {
                ActivityScheduler::with_seed(handler, self.clock.clone(), simulation, seed.wrapping_add(3))
            }
            None => ActivityScheduler::new(handler, self.clock.clone(), simulation),
        }
    }
}
