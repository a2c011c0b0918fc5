//! Persistent storage for box records.
//!
//! Implements:
//! - One JSON record per box (`box-{id}.json`)
//! - Atomic replace on write (temp file + rename)
//! - Configurable sync policy
//!
//! The repository does raw reads and writes only. Occupancy rules live in
//! the state machine.

use crate::types::{BoxId, LockerBox};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const RECORD_PREFIX: &str = "box-";
const RECORD_SUFFIX: &str = ".json";

/// Errors from the box repository
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Box {0} not found")]
    NotFound(BoxId),

    #[error("Corrupt record for box {box_id}: {reason}")]
    Corrupt { box_id: BoxId, reason: String },
}

/// Durable store of box records
pub trait BoxRepository: Send + Sync {
    /// All boxes, ordered by id. Fails if any record is unreadable.
    fn list_all(&self) -> Result<Vec<LockerBox>, StorageError>;

    /// A single box, or [`StorageError::NotFound`]
    fn get(&self, box_id: BoxId) -> Result<LockerBox, StorageError>;

    /// Insert or replace the record for `b.box_id`
    fn save(&self, b: &LockerBox) -> Result<(), StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.list_all()?.is_empty())
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the box records
    pub dir: PathBuf,
    /// Sync to disk after every write
    pub fsync_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./locker-data"),
            fsync_on_write: true,
        }
    }
}

impl StorageConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }
}

/// File-backed repository, one JSON file per box
pub struct FileBoxRepository {
    config: StorageConfig,
    /// Serializes writers so temp files never collide
    write_lock: Mutex<()>,
}

impl FileBoxRepository {
    /// Open (and create if needed) the data directory
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.dir)?;
        info!("Storage: Opened box records at {:?}", config.dir);

        Ok(Self {
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, box_id: BoxId) -> PathBuf {
        self.config
            .dir
            .join(format!("{}{}{}", RECORD_PREFIX, box_id, RECORD_SUFFIX))
    }

    /// Box id encoded in a record file name, if it is one
    fn parse_record_name(name: &str) -> Option<BoxId> {
        name.strip_prefix(RECORD_PREFIX)?
            .strip_suffix(RECORD_SUFFIX)?
            .parse()
            .ok()
    }

    fn read_record(&self, box_id: BoxId, path: &Path) -> Result<LockerBox, StorageError> {
        let data = fs::read_to_string(path)?;
        let b: LockerBox = serde_json::from_str(&data).map_err(|e| StorageError::Corrupt {
            box_id,
            reason: e.to_string(),
        })?;

        if b.box_id != box_id {
            return Err(StorageError::Corrupt {
                box_id,
                reason: format!("record holds box {}", b.box_id),
            });
        }
        Ok(b)
    }
}

impl BoxRepository for FileBoxRepository {
    fn list_all(&self) -> Result<Vec<LockerBox>, StorageError> {
        let mut boxes = Vec::new();

        for entry in fs::read_dir(&self.config.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(box_id) = name.to_str().and_then(Self::parse_record_name) else {
                continue;
            };

            // A missing box would make fullness and the box list lie
            match self.read_record(box_id, &entry.path()) {
                Ok(b) => boxes.push(b),
                Err(e) => {
                    warn!("Storage: Unreadable record for box {}: {}", box_id, e);
                    return Err(e);
                }
            }
        }

        boxes.sort_by_key(|b| b.box_id);
        Ok(boxes)
    }

    fn get(&self, box_id: BoxId) -> Result<LockerBox, StorageError> {
        let path = self.record_path(box_id);
        if !path.exists() {
            return Err(StorageError::NotFound(box_id));
        }
        self.read_record(box_id, &path)
    }

    fn save(&self, b: &LockerBox) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();

        let path = self.record_path(b.box_id);
        let temp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(b)?;

        {
            let mut file = File::create(&temp_path)?;
            file.write_all(data.as_bytes())?;
            if self.config.fsync_on_write {
                file.sync_all()?;
            }
        }
        fs::rename(&temp_path, &path)?;

        debug!(
            "Storage: Saved box {} (occupied={})",
            b.box_id,
            b.is_occupied()
        );
        Ok(())
    }
}

/// In-memory repository for testing
#[derive(Default)]
pub struct MemoryBoxRepository {
    boxes: RwLock<BTreeMap<BoxId, LockerBox>>,
}

impl MemoryBoxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boxes(boxes: impl IntoIterator<Item = LockerBox>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.boxes.write();
            for b in boxes {
                map.insert(b.box_id, b);
            }
        }
        repo
    }
}

impl BoxRepository for MemoryBoxRepository {
    fn list_all(&self) -> Result<Vec<LockerBox>, StorageError> {
        Ok(self.boxes.read().values().cloned().collect())
    }

    fn get(&self, box_id: BoxId) -> Result<LockerBox, StorageError> {
        self.boxes
            .read()
            .get(&box_id)
            .cloned()
            .ok_or(StorageError::NotFound(box_id))
    }

    fn save(&self, b: &LockerBox) -> Result<(), StorageError> {
        self.boxes.write().insert(b.box_id, b.clone());
        Ok(())
    }
}
