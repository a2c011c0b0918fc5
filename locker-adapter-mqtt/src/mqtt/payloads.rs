//! Outbound JSON payloads

use chrono::{DateTime, Utc};
use locker_core::{BoxRecord, LockerBox};
use serde::{Deserialize, Serialize};

use super::topics::ProtocolError;

/// Periodic status telemetry on `lockers/{id}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub locker_id: String,
    pub is_full: bool,
    pub status: String,
    pub temperature_c: f64,
    pub last_online: DateTime<Utc>,
}

/// Body of `lockers/{id}/response/boxes`
pub fn box_records(boxes: &[LockerBox]) -> Vec<BoxRecord> {
    boxes.iter().map(LockerBox::to_record).collect()
}

/// Serialize a payload to JSON bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}
