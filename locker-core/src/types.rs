//! Core types for the locker box model

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a box within a locker
pub type BoxId = u32;

/// Lowest value of an unlock code part
pub const CODE_PART_MIN: u16 = 1000;

/// Highest value of an unlock code part
pub const CODE_PART_MAX: u16 = 9999;

/// Inner dimensions of a box in centimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width_cm: f64,
    pub length_cm: f64,
    pub height_cm: f64,
}

impl Dimensions {
    pub fn new(width_cm: f64, length_cm: f64, height_cm: f64) -> Self {
        Self {
            width_cm,
            length_cm,
            height_cm,
        }
    }

    /// Volume is always derived from the three sides
    pub fn volume_cm3(&self) -> f64 {
        self.width_cm * self.length_cm * self.height_cm
    }

    /// All sides finite and strictly positive
    pub fn is_valid(&self) -> bool {
        [self.width_cm, self.length_cm, self.height_cm]
            .iter()
            .all(|side| side.is_finite() && *side > 0.0)
    }
}

/// Two-part unlock code handed out when a box becomes occupied.
///
/// The parts are drawn independently so they can be given to different
/// recipients (courier and customer) and verified separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockCode {
    pub part1: u16,
    pub part2: u16,
}

impl UnlockCode {
    /// Draw both parts uniformly from [`CODE_PART_MIN`, `CODE_PART_MAX`]
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let part1 = rng.gen_range(CODE_PART_MIN..=CODE_PART_MAX);
        let part2 = rng.gen_range(CODE_PART_MIN..=CODE_PART_MAX);
        Self { part1, part2 }
    }

    pub fn is_valid(&self) -> bool {
        (CODE_PART_MIN..=CODE_PART_MAX).contains(&self.part1)
            && (CODE_PART_MIN..=CODE_PART_MAX).contains(&self.part2)
    }
}

impl fmt::Display for UnlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.part1, self.part2)
    }
}

/// Occupancy data. Exists only while a box is occupied, so a box can never
/// carry timestamps or a code without being occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub code: UnlockCode,
}

/// Occupancy state of a single box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxState {
    Empty,
    Occupied,
}

/// One lockable compartment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoxRecord", into = "BoxRecord")]
pub struct LockerBox {
    pub box_id: BoxId,
    pub dimensions: Dimensions,
    pub occupancy: Option<Occupancy>,
}

impl LockerBox {
    /// Create an empty box
    pub fn new(box_id: BoxId, dimensions: Dimensions) -> Self {
        Self {
            box_id,
            dimensions,
            occupancy: None,
        }
    }

    pub fn state(&self) -> BoxState {
        if self.occupancy.is_some() {
            BoxState::Occupied
        } else {
            BoxState::Empty
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupancy.is_some()
    }

    pub fn volume_cm3(&self) -> f64 {
        self.dimensions.volume_cm3()
    }

    pub fn occupied_from(&self) -> Option<DateTime<Utc>> {
        self.occupancy.map(|o| o.from)
    }

    pub fn occupied_to(&self) -> Option<DateTime<Utc>> {
        self.occupancy.map(|o| o.to)
    }

    pub fn unlock_code(&self) -> Option<UnlockCode> {
        self.occupancy.map(|o| o.code)
    }

    /// Flat record used for storage and the box-data response
    pub fn to_record(&self) -> BoxRecord {
        BoxRecord::from(self.clone())
    }
}

/// Reasons a flat record cannot become a [`LockerBox`]
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("box {0}: occupancy fields do not match is_occupied")]
    PartialOccupancy(BoxId),

    #[error("box {0}: occupied_to must be after occupied_from")]
    InvalidWindow(BoxId),

    #[error("box {box_id}: invalid unlock code part {value:?}")]
    InvalidCode { box_id: BoxId, value: String },

    #[error("box {0}: dimensions must be positive")]
    InvalidDimensions(BoxId),
}

/// Flat box record with stable field names.
///
/// This is the persisted layout and the element type of the
/// `response/boxes` payload. Code parts are strings, absent values are null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub box_id: BoxId,
    pub width_cm: f64,
    pub length_cm: f64,
    pub height_cm: f64,
    pub volume_cm3: f64,
    pub is_occupied: bool,
    pub occupied_from: Option<DateTime<Utc>>,
    pub occupied_to: Option<DateTime<Utc>>,
    pub unlock_code_part1: Option<String>,
    pub unlock_code_part2: Option<String>,
}

impl From<LockerBox> for BoxRecord {
    fn from(b: LockerBox) -> Self {
        let volume_cm3 = b.volume_cm3();
        Self {
            box_id: b.box_id,
            width_cm: b.dimensions.width_cm,
            length_cm: b.dimensions.length_cm,
            height_cm: b.dimensions.height_cm,
            volume_cm3,
            is_occupied: b.is_occupied(),
            occupied_from: b.occupied_from(),
            occupied_to: b.occupied_to(),
            unlock_code_part1: b.unlock_code().map(|c| c.part1.to_string()),
            unlock_code_part2: b.unlock_code().map(|c| c.part2.to_string()),
        }
    }
}

impl TryFrom<BoxRecord> for LockerBox {
    type Error = RecordError;

    fn try_from(r: BoxRecord) -> Result<Self, Self::Error> {
        let dimensions = Dimensions::new(r.width_cm, r.length_cm, r.height_cm);
        if !dimensions.is_valid() {
            return Err(RecordError::InvalidDimensions(r.box_id));
        }

        // volume_cm3 is a cache; the dimensions are the source of truth
        let occupancy = match (
            r.is_occupied,
            r.occupied_from,
            r.occupied_to,
            r.unlock_code_part1,
            r.unlock_code_part2,
        ) {
            (false, None, None, None, None) => None,
            (true, Some(from), Some(to), Some(p1), Some(p2)) => {
                if to <= from {
                    return Err(RecordError::InvalidWindow(r.box_id));
                }
                let code = UnlockCode {
                    part1: parse_code_part(r.box_id, &p1)?,
                    part2: parse_code_part(r.box_id, &p2)?,
                };
                Some(Occupancy { from, to, code })
            }
            _ => return Err(RecordError::PartialOccupancy(r.box_id)),
        };

        Ok(Self {
            box_id: r.box_id,
            dimensions,
            occupancy,
        })
    }
}

fn parse_code_part(box_id: BoxId, value: &str) -> Result<u16, RecordError> {
    value
        .parse::<u16>()
        .ok()
        .filter(|part| (CODE_PART_MIN..=CODE_PART_MAX).contains(part))
        .ok_or_else(|| RecordError::InvalidCode {
            box_id,
            value: value.to_string(),
        })
}
