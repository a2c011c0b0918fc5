//! Periodic status publication and simulated box activity
//!
//! Each cycle:
//! 1. Publish a fresh status payload
//! 2. With `activity_probability`, pick a random box and with
//!    `flip_probability` flip its occupancy
//! 3. Pause for a random interval in `[min_interval, max_interval]`
//!
//! Pauses go through the injected [`Clock`], so tests drive cycles without
//! waiting on wall-clock time.

use std::sync::Arc;
use std::time::Duration;

use locker_core::{BoxId, BoxStateMachine, Clock, Transition};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::handler::{on_state, ProtocolHandler};
use crate::config::{ConfigError, SimulationConfig};

/// Result of the activity step of a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// Box picked but left alone
    Untouched { box_id: BoxId },
    /// Box picked and flipped
    Flipped { box_id: BoxId, transition: Transition },
    /// Locker has no boxes to pick from
    NoBoxes,
    /// Reading or writing boxes failed
    Failed { reason: String },
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Whether the status payload went out
    pub status_published: bool,
    /// Activity simulation, if it ran this cycle
    pub activity: Option<Activity>,
    /// Pause before the next cycle
    pub next_delay: Duration,
}

/// Driver loop for status telemetry and simulated activity
pub struct ActivityScheduler {
    handler: Arc<ProtocolHandler>,
    state: Arc<BoxStateMachine>,
    clock: Arc<dyn Clock>,
    config: SimulationConfig,
    rng: StdRng,
}

impl ActivityScheduler {
    pub fn new(
        handler: Arc<ProtocolHandler>,
        clock: Arc<dyn Clock>,
        config: SimulationConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(handler, clock, config, StdRng::from_entropy())
    }

    /// Scheduler with a deterministic RNG
    pub fn with_seed(
        handler: Arc<ProtocolHandler>,
        clock: Arc<dyn Clock>,
        config: SimulationConfig,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(handler, clock, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        handler: Arc<ProtocolHandler>,
        clock: Arc<dyn Clock>,
        config: SimulationConfig,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: handler.state().clone(),
            handler,
            clock,
            config,
            rng,
        })
    }

    /// Run one cycle without pausing
    pub async fn tick(&mut self) -> TickReport {
        let status_published = match self.handler.publish_status().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Scheduler: Skipping status update this cycle: {}", e);
                false
            }
        };

        let activity = if self.rng.gen_bool(self.config.activity_probability) {
            Some(self.simulate_activity().await)
        } else {
            None
        };

        TickReport {
            status_published,
            activity,
            next_delay: self.next_delay(),
        }
    }

    /// Pick one box and maybe flip it
    async fn simulate_activity(&mut self) -> Activity {
        let boxes = match on_state(&self.state, |sm| sm.boxes()).await {
            Ok(boxes) => boxes,
            Err(e) => {
                error!("Scheduler: Activity simulation failed to read boxes: {}", e);
                return Activity::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let Some(picked) = boxes.choose(&mut self.rng) else {
            return Activity::NoBoxes;
        };
        let box_id = picked.box_id;

        if !self.rng.gen_bool(self.config.flip_probability) {
            debug!("Scheduler: Box {} left unchanged", box_id);
            return Activity::Untouched { box_id };
        }

        match on_state(&self.state, move |sm| sm.toggle(box_id)).await {
            Ok(result) => {
                info!(
                    "Scheduler: Simulated box {} occupancy change to {}",
                    box_id,
                    if result.locker_box.is_occupied() { "occupied" } else { "empty" }
                );
                Activity::Flipped {
                    box_id,
                    transition: result.transition,
                }
            }
            Err(e) => {
                error!("Scheduler: Activity simulation failed for box {}: {}", box_id, e);
                Activity::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn next_delay(&mut self) -> Duration {
        let min = self.config.min_interval.as_millis() as u64;
        let max = self.config.max_interval.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// Run cycles until the shutdown signal fires. Returns the cycle count.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            "Scheduler: Started with interval {:?}..={:?}, activity p={}, flip p={}",
            self.config.min_interval,
            self.config.max_interval,
            self.config.activity_probability,
            self.config.flip_probability
        );

        let mut cycles = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            // A stalled publish must not hold up shutdown
            let report = tokio::select! {
                report = self.tick() => report,
                _ = shutdown.changed() => break,
            };
            cycles += 1;

            tokio::select! {
                _ = self.clock.sleep(report.next_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Scheduler: Stopped after {} cycles", cycles);
        cycles
    }
}
