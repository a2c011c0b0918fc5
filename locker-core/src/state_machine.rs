//! Box occupancy state machine
//!
//! Every change to a box's occupancy goes through [`BoxStateMachine`]:
//! - `EMPTY -> OCCUPIED` (occupy): stamps the window and draws a fresh code
//! - `OCCUPIED -> EMPTY` (release): clears window and code, idempotent
//! - same state requested: stored fields pass through untouched
//!
//! Read-modify-write cycles are serialized by a single mutation lock, so
//! the scheduler and the message handler can share one instance.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::storage::{BoxRepository, StorageError};
use crate::types::{BoxId, LockerBox, Occupancy, UnlockCode};

/// Shortest occupancy window in hours
pub const MIN_OCCUPANCY_HOURS: i64 = 1;

/// Longest occupancy window in hours
pub const MAX_OCCUPANCY_HOURS: i64 = 24;

/// Errors from state transitions
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Box {0} not found")]
    NotFound(BoxId),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for StateError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(box_id) => StateError::NotFound(box_id),
            other => StateError::Storage(other),
        }
    }
}

/// What a transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Box went from empty to occupied
    Occupied,
    /// Box went from occupied to empty
    Released,
    /// Requested state equals current state, nothing written
    Unchanged,
}

/// Outcome of a transition with the resulting box
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub transition: Transition,
    pub locker_box: LockerBox,
}

/// True iff no box is empty. Vacuously true for a locker without boxes.
pub fn is_locker_full(boxes: &[LockerBox]) -> bool {
    boxes.iter().all(LockerBox::is_occupied)
}

/// Owner of all occupancy mutations
pub struct BoxStateMachine {
    repo: Arc<dyn BoxRepository>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    mutation: Mutex<()>,
}

impl BoxStateMachine {
    /// Create a state machine with an entropy-seeded RNG
    pub fn new(repo: Arc<dyn BoxRepository>, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(repo, clock, StdRng::from_entropy())
    }

    /// Create a state machine with a deterministic RNG
    pub fn with_seed(repo: Arc<dyn BoxRepository>, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(repo, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(repo: Arc<dyn BoxRepository>, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            repo,
            clock,
            rng: Mutex::new(rng),
            mutation: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn BoxRepository> {
        &self.repo
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Mark an empty box occupied with a new window and code
    pub fn occupy(&self, box_id: BoxId) -> Result<TransitionResult, StateError> {
        self.set_occupancy(box_id, true)
    }

    /// Empty a box. Releasing an empty box is a no-op.
    pub fn release(&self, box_id: BoxId) -> Result<TransitionResult, StateError> {
        self.set_occupancy(box_id, false)
    }

    /// Bring a box into the requested occupancy state
    pub fn set_occupancy(&self, box_id: BoxId, occupied: bool) -> Result<TransitionResult, StateError> {
        self.transition(box_id, |_| occupied)
    }

    /// Flip the occupancy of a box
    pub fn toggle(&self, box_id: BoxId) -> Result<TransitionResult, StateError> {
        self.transition(box_id, |current| !current)
    }

    /// Read, decide the target state from the current one, write
    fn transition(
        &self,
        box_id: BoxId,
        target: impl FnOnce(bool) -> bool,
    ) -> Result<TransitionResult, StateError> {
        let _guard = self.mutation.lock();

        let mut locker_box = self.repo.get(box_id)?;
        let occupied = target(locker_box.is_occupied());

        let transition = match (locker_box.is_occupied(), occupied) {
            (false, true) => {
                let occupancy = self.draw_occupancy();
                info!(
                    "State: Box {} is now OCCUPIED until {}. Code: {}",
                    box_id, occupancy.to, occupancy.code
                );
                locker_box.occupancy = Some(occupancy);
                Transition::Occupied
            }
            (true, false) => {
                locker_box.occupancy = None;
                info!("State: Box {} is now EMPTY", box_id);
                Transition::Released
            }
            _ => {
                debug!("State: Box {} already in requested state (occupied={})", box_id, occupied);
                return Ok(TransitionResult {
                    transition: Transition::Unchanged,
                    locker_box,
                });
            }
        };

        self.repo.save(&locker_box)?;

        Ok(TransitionResult {
            transition,
            locker_box,
        })
    }

    /// All boxes in id order
    pub fn boxes(&self) -> Result<Vec<LockerBox>, StateError> {
        Ok(self.repo.list_all()?)
    }

    /// Whether every box of the locker is occupied
    pub fn locker_full(&self) -> Result<bool, StateError> {
        Ok(is_locker_full(&self.boxes()?))
    }

    fn draw_occupancy(&self) -> Occupancy {
        let mut rng = self.rng.lock();
        let from = self.clock.now();
        let hours = rng.gen_range(MIN_OCCUPANCY_HOURS..=MAX_OCCUPANCY_HOURS);
        let code = UnlockCode::generate(&mut *rng);

        Occupancy {
            from,
            to: from + Duration::hours(hours),
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryBoxRepository;
    use crate::types::{BoxState, Dimensions};
    use chrono::Utc;

    fn machine(count: u32) -> BoxStateMachine {
        let repo = MemoryBoxRepository::with_boxes(
            (1..=count).map(|id| LockerBox::new(id, Dimensions::new(20.0, 30.0, 40.0))),
        );
        BoxStateMachine::with_seed(Arc::new(repo), Arc::new(ManualClock::new(Utc::now())), 42)
    }

    #[test]
    fn test_occupy_sets_window_and_code() {
        let sm = machine(2);
        let result = sm.occupy(1).unwrap();

        assert_eq!(result.transition, Transition::Occupied);
        let occupancy = result.locker_box.occupancy.unwrap();
        let window = occupancy.to - occupancy.from;
        assert!(window >= Duration::hours(MIN_OCCUPANCY_HOURS));
        assert!(window <= Duration::hours(MAX_OCCUPANCY_HOURS));
        assert!(occupancy.code.is_valid());

        // Persisted through the repository
        assert_eq!(sm.repository().get(1).unwrap().state(), BoxState::Occupied);
    }

    #[test]
    fn test_occupy_uses_clock() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let repo = MemoryBoxRepository::with_boxes([LockerBox::new(1, Dimensions::new(1.0, 1.0, 1.0))]);
        let sm = BoxStateMachine::with_seed(Arc::new(repo), clock, 1);

        let result = sm.occupy(1).unwrap();
        assert_eq!(result.locker_box.occupied_from(), Some(start));
    }

    #[test]
    fn test_release_is_idempotent() {
        let sm = machine(1);
        sm.occupy(1).unwrap();

        let first = sm.release(1).unwrap();
        assert_eq!(first.transition, Transition::Released);
        assert!(first.locker_box.occupancy.is_none());

        let second = sm.release(1).unwrap();
        assert_eq!(second.transition, Transition::Unchanged);
        assert_eq!(second.locker_box, first.locker_box);
    }

    #[test]
    fn test_self_transition_keeps_code() {
        let sm = machine(1);
        let occupied = sm.occupy(1).unwrap().locker_box;

        let again = sm.set_occupancy(1, true).unwrap();
        assert_eq!(again.transition, Transition::Unchanged);
        assert_eq!(again.locker_box.occupancy, occupied.occupancy);
    }

    #[test]
    fn test_unknown_box() {
        let sm = machine(5);
        assert!(matches!(sm.release(99), Err(StateError::NotFound(99))));
        assert!(matches!(sm.occupy(0), Err(StateError::NotFound(0))));
    }

    #[test]
    fn test_toggle() {
        let sm = machine(1);
        assert_eq!(sm.toggle(1).unwrap().transition, Transition::Occupied);
        assert_eq!(sm.toggle(1).unwrap().transition, Transition::Released);
    }

    #[test]
    fn test_locker_full() {
        let sm = machine(2);
        assert!(!sm.locker_full().unwrap());

        sm.occupy(1).unwrap();
        assert!(!sm.locker_full().unwrap());

        sm.occupy(2).unwrap();
        assert!(sm.locker_full().unwrap());

        sm.release(1).unwrap();
        assert!(!sm.locker_full().unwrap());
    }

    #[test]
    fn test_empty_locker_is_full() {
        assert!(is_locker_full(&[]));
    }

    fn assert_consistent(b: &LockerBox) {
        match b.occupancy {
            Some(o) => {
                assert!(o.to > o.from, "box {}", b.box_id);
                assert!(o.code.is_valid(), "box {}", b.box_id);
            }
            None => {
                assert!(b.occupied_from().is_none() && b.unlock_code().is_none());
            }
        }
    }

    #[test]
    fn test_concurrent_toggles_are_serialized() {
        const THREADS: usize = 7;
        const TOGGLES: usize = 15;

        let sm = machine(3);
        let results: Vec<Transition> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        (0..TOGGLES)
                            .map(|_| sm.toggle(1).unwrap().transition)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        // Every toggle observed the previous write: no lost or doubled flips
        let occupied = results.iter().filter(|t| **t == Transition::Occupied).count();
        let released = results.iter().filter(|t| **t == Transition::Released).count();
        assert_eq!(occupied + released, THREADS * TOGGLES);
        assert_eq!(occupied, released + 1);

        let boxes = sm.boxes().unwrap();
        assert!(boxes[0].is_occupied(), "odd number of toggles");
        assert!(!boxes[1].is_occupied() && !boxes[2].is_occupied());
        boxes.iter().for_each(assert_consistent);
    }

    #[test]
    fn test_concurrent_mixed_operations() {
        let sm = machine(4);
        std::thread::scope(|scope| {
            for t in 0..8u32 {
                let sm = &sm;
                scope.spawn(move || {
                    for i in 0..50u32 {
                        let box_id = (t + i) % 4 + 1;
                        match (t + i) % 3 {
                            0 => sm.occupy(box_id).unwrap(),
                            1 => sm.release(box_id).unwrap(),
                            _ => sm.toggle(box_id).unwrap(),
                        };
                    }
                });
            }
        });

        let boxes = sm.boxes().unwrap();
        assert_eq!(boxes.len(), 4);
        boxes.iter().for_each(assert_consistent);
    }

    #[test]
    fn test_corrupt_record_fails_fullness() {
        use crate::storage::{FileBoxRepository, StorageConfig};

        let dir = tempfile::tempdir().unwrap();
        let repo = FileBoxRepository::open(StorageConfig::new(dir.path())).unwrap();
        repo.save(&LockerBox::new(1, Dimensions::new(20.0, 20.0, 20.0))).unwrap();
        repo.save(&LockerBox::new(2, Dimensions::new(20.0, 20.0, 20.0))).unwrap();
        let sm = BoxStateMachine::with_seed(Arc::new(repo), Arc::new(ManualClock::default()), 3);
        sm.occupy(2).unwrap();

        // Box 1 is empty, so a listing without it would claim the locker is full
        std::fs::write(dir.path().join("box-1.json"), "{truncated").unwrap();

        assert!(matches!(
            sm.locker_full(),
            Err(StateError::Storage(StorageError::Corrupt { box_id: 1, .. }))
        ));
        assert!(matches!(sm.boxes(), Err(StateError::Storage(_))));
    }
}
