//! First-start provisioning of box records

use std::ops::Range;

use rand::Rng;
use tracing::info;

use crate::storage::{BoxRepository, StorageError};
use crate::types::{BoxId, Dimensions, LockerBox};

pub const WIDTH_RANGE_CM: Range<f64> = 20.0..50.0;
pub const LENGTH_RANGE_CM: Range<f64> = 20.0..50.0;
pub const HEIGHT_RANGE_CM: Range<f64> = 15.0..40.0;

/// Default number of boxes in a freshly provisioned locker
pub const DEFAULT_BOX_COUNT: u32 = 5;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Random box dimensions, rounded to two decimals
pub fn random_dimensions<R: Rng + ?Sized>(rng: &mut R) -> Dimensions {
    Dimensions::new(
        round2(rng.gen_range(WIDTH_RANGE_CM)),
        round2(rng.gen_range(LENGTH_RANGE_CM)),
        round2(rng.gen_range(HEIGHT_RANGE_CM)),
    )
}

/// Create boxes `1..=count` if the repository holds none.
///
/// Returns the number of boxes created; an already provisioned locker is
/// left as is and yields 0.
pub fn provision_boxes<R: Rng + ?Sized>(
    repo: &dyn BoxRepository,
    count: u32,
    rng: &mut R,
) -> Result<usize, StorageError> {
    if !repo.is_empty()? {
        info!("Storage: Locker already contains boxes, skipping provisioning");
        return Ok(0);
    }

    info!("Storage: Provisioning {} empty boxes", count);
    for box_id in 1..=count as BoxId {
        repo.save(&LockerBox::new(box_id, random_dimensions(rng)))?;
    }

    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBoxRepository;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_provision_empty_repository() {
        let repo = MemoryBoxRepository::new();
        let mut rng = StdRng::seed_from_u64(3);

        let created = provision_boxes(&repo, DEFAULT_BOX_COUNT, &mut rng).unwrap();
        assert_eq!(created, 5);

        let boxes = repo.list_all().unwrap();
        let ids: Vec<_> = boxes.iter().map(|b| b.box_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        for b in &boxes {
            assert!(!b.is_occupied());
            assert!(WIDTH_RANGE_CM.start <= b.dimensions.width_cm);
            assert!(b.dimensions.width_cm <= WIDTH_RANGE_CM.end);
            assert!(HEIGHT_RANGE_CM.start <= b.dimensions.height_cm);
            assert!(b.dimensions.height_cm <= HEIGHT_RANGE_CM.end);
            assert_eq!(round2(b.dimensions.length_cm), b.dimensions.length_cm);
        }
    }

    #[test]
    fn test_provision_is_skipped_when_populated() {
        let repo = MemoryBoxRepository::new();
        let mut rng = StdRng::seed_from_u64(3);

        provision_boxes(&repo, 2, &mut rng).unwrap();
        let before = repo.list_all().unwrap();

        assert_eq!(provision_boxes(&repo, 8, &mut rng).unwrap(), 0);
        assert_eq!(repo.list_all().unwrap(), before);
    }
}
