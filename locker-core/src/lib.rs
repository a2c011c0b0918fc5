//! Locker Core Library
//!
//! Box model, durable box storage and the occupancy state machine for a
//! simulated smart locker. Transport-agnostic: the MQTT adapter and the
//! node binary build on top of this crate.

pub mod types;
pub mod clock;
pub mod storage;
pub mod state_machine;
pub mod provision;

pub use types::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use storage::{BoxRepository, FileBoxRepository, MemoryBoxRepository, StorageConfig, StorageError};
pub use state_machine::{is_locker_full, BoxStateMachine, StateError, Transition, TransitionResult};
pub use provision::provision_boxes;
