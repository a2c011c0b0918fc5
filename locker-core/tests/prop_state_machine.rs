//! Property tests for the box state machine
//!
//! Tests invariants for:
//! - Occupancy consistency: empty <=> no window and no code
//! - Window: occupied_to strictly after occupied_from, 1h..=24h
//! - Release idempotency
//! - Locker fullness

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use locker_core::state_machine::{MAX_OCCUPANCY_HOURS, MIN_OCCUPANCY_HOURS};
use locker_core::*;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

// ============================================================================
// Strategies
// ============================================================================

fn box_count() -> impl Strategy<Value = u32> {
    1u32..=8u32
}

/// Sequence of (box index, requested occupancy) operations
fn operations() -> impl Strategy<Value = Vec<(u32, bool)>> {
    prop::collection::vec((0u32..8u32, any::<bool>()), 0..60)
}

fn new_machine(count: u32, seed: u64) -> BoxStateMachine {
    let repo = MemoryBoxRepository::with_boxes(
        (1..=count).map(|id| LockerBox::new(id, Dimensions::new(25.0, 25.0, 25.0))),
    );
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    BoxStateMachine::with_seed(Arc::new(repo), Arc::new(ManualClock::new(start)), seed)
}

fn assert_consistent(b: &LockerBox) -> Result<(), TestCaseError> {
    let record = b.to_record();
    let has_any = record.occupied_from.is_some()
        || record.occupied_to.is_some()
        || record.unlock_code_part1.is_some()
        || record.unlock_code_part2.is_some();
    let has_all = record.occupied_from.is_some()
        && record.occupied_to.is_some()
        && record.unlock_code_part1.is_some()
        && record.unlock_code_part2.is_some();

    if record.is_occupied {
        prop_assert!(has_all, "occupied box {} missing fields", b.box_id);
    } else {
        prop_assert!(!has_any, "empty box {} carries fields", b.box_id);
    }
    Ok(())
}

// ============================================================================
// Transition Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: a box is never partially occupied
    #[test]
    fn occupancy_fields_consistent(
        count in box_count(),
        ops in operations(),
        seed in any::<u64>()
    ) {
        let sm = new_machine(count, seed);

        for (index, occupied) in ops {
            let box_id = index % count + 1;
            let result = sm.set_occupancy(box_id, occupied).unwrap();
            prop_assert_eq!(result.locker_box.is_occupied(), occupied);

            for b in sm.boxes().unwrap() {
                assert_consistent(&b)?;
            }
        }
    }

    /// Occupy always produces a window of 1..=24 whole hours
    #[test]
    fn occupy_window_valid(seed in any::<u64>()) {
        let sm = new_machine(1, seed);
        let occupancy = sm.occupy(1).unwrap().locker_box.occupancy.unwrap();

        prop_assert!(occupancy.to > occupancy.from);
        let window = occupancy.to - occupancy.from;
        prop_assert!(window >= Duration::hours(MIN_OCCUPANCY_HOURS));
        prop_assert!(window <= Duration::hours(MAX_OCCUPANCY_HOURS));
        prop_assert_eq!(window.num_minutes() % 60, 0);
        prop_assert!(occupancy.code.is_valid());
    }

    /// Releasing twice yields identical state
    #[test]
    fn release_idempotent(occupy_first in any::<bool>(), seed in any::<u64>()) {
        let sm = new_machine(1, seed);
        if occupy_first {
            sm.occupy(1).unwrap();
        }

        let first = sm.release(1).unwrap().locker_box;
        let second = sm.release(1).unwrap();

        prop_assert_eq!(second.transition, Transition::Unchanged);
        prop_assert_eq!(&second.locker_box, &first);
        prop_assert_eq!(sm.repository().get(1).unwrap(), first);
    }

    /// Full iff every box is occupied
    #[test]
    fn full_iff_all_occupied(occupied in prop::collection::vec(any::<bool>(), 0..10)) {
        let boxes: Vec<_> = occupied
            .iter()
            .enumerate()
            .map(|(i, occ)| {
                let mut b = LockerBox::new(i as u32 + 1, Dimensions::new(1.0, 1.0, 1.0));
                if *occ {
                    let from = Utc::now();
                    b.occupancy = Some(Occupancy {
                        from,
                        to: from + Duration::hours(1),
                        code: UnlockCode { part1: 1000, part2: 9999 },
                    });
                }
                b
            })
            .collect();

        prop_assert_eq!(is_locker_full(&boxes), occupied.iter().all(|o| *o));
    }
}

// ============================================================================
// Distribution
// ============================================================================

#[test]
fn unlock_code_parts_uniform_and_independent() {
    let mut rng = StdRng::seed_from_u64(2024);
    let trials = 90_000;
    let buckets = 9;
    let mut counts1 = vec![0usize; buckets];
    let mut counts2 = vec![0usize; buckets];
    let mut equal = 0usize;

    for _ in 0..trials {
        let code = UnlockCode::generate(&mut rng);
        assert!(code.is_valid());
        counts1[((code.part1 - CODE_PART_MIN) / 1000) as usize] += 1;
        counts2[((code.part2 - CODE_PART_MIN) / 1000) as usize] += 1;
        if code.part1 == code.part2 {
            equal += 1;
        }
    }

    // Each thousand-wide bucket should hold about 1/9 of the draws
    let expected = trials / buckets;
    for count in counts1.iter().chain(counts2.iter()) {
        let deviation = (*count as f64 - expected as f64).abs() / expected as f64;
        assert!(deviation < 0.05, "bucket count {count} too far from {expected}");
    }

    // Independent parts collide about once per 9000 draws
    assert!(equal < 50, "parts collided {equal} times");
}
