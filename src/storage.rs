//! Durable storage for the intake snapshot.
//! Flat key/value document; a JSON file on disk or an in-memory map for tests.

use crate::types::IntakeSnapshot;
use chrono::{DateTime, FixedOffset, Local};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_TOTAL_INTAKE: &str = "totalIntake";
pub const KEY_REFILL_AMOUNT: &str = "refillAmount";
pub const KEY_CURRENT_VOLUME: &str = "currentVolume";
pub const KEY_LAST_SAVED_DATE: &str = "lastSavedDate";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    InvalidValue { key: String, reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O error: {}", e),
            StoreError::Serialization(e) => write!(f, "Store serialization error: {}", e),
            StoreError::InvalidValue { key, reason } => write!(f, "Invalid value for {}: {}", key, reason),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Serialization(e) => Some(e),
            StoreError::InvalidValue { .. } => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e)
    }
}

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    /// Write all entries in one commit.
    fn set_all(&mut self, entries: Vec<(&str, Value)>) -> Result<(), StoreError>;

    fn get_f64(&self, key: &str) -> Result<Option<f64>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| StoreError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a number, found {}", value),
            }),
        }
    }

    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => DateTime::parse_from_rfc3339(&text)
                .map(Some)
                .map_err(|e| StoreError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            Some(other) => Err(StoreError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected an RFC 3339 string, found {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Map<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set_all(&mut self, entries: Vec<(&str, Value)>) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.values.insert(key.to_string(), value);
        }
        Ok(())
    }
}

/// JSON document on disk. Every commit rewrites a sibling temp file and renames it over the
/// original so a crash never leaves a half-written document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            info!("🗄️ No store at {} - starting empty", path.display());
            Map::new()
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let serialized = serde_json::to_string_pretty(&self.values)?;
        fs::write(&temp, serialized)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set_all(&mut self, entries: Vec<(&str, Value)>) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.values.insert(key.to_string(), value);
        }
        self.commit()
    }
}

/// Values recovered from the store at startup or on foreground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoredIntake {
    pub total_intake_ml: f64,
    pub refill_amount_ml: f64,
    pub current_volume_ml: f64,
    /// The stored total belonged to an earlier day (or had no date) and was discarded.
    pub rolled_over: bool,
}

pub struct SnapshotStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SnapshotStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn save_at(&mut self, snapshot: &IntakeSnapshot, now: DateTime<Local>) -> Result<(), StoreError> {
        self.store.set_all(vec![
            (KEY_TOTAL_INTAKE, Value::from(snapshot.total_intake_ml)),
            (KEY_REFILL_AMOUNT, Value::from(snapshot.refill_amount_ml)),
            (KEY_CURRENT_VOLUME, Value::from(snapshot.current_volume_ml)),
            (KEY_LAST_SAVED_DATE, Value::from(now.to_rfc3339())),
        ])?;
        debug!(
            "💾 Saved snapshot: total={:.1} mL, refill={:.1} mL, current={:.1} mL",
            snapshot.total_intake_ml, snapshot.refill_amount_ml, snapshot.current_volume_ml
        );
        Ok(())
    }

    /// The total survives only if it was saved on the same local calendar day as `now`.
    pub fn load_at(&self, now: DateTime<Local>) -> Result<RestoredIntake, StoreError> {
        let stored_total = self.store.get_f64(KEY_TOTAL_INTAKE)?.unwrap_or(0.0);
        let refill_amount_ml = self.store.get_f64(KEY_REFILL_AMOUNT)?.unwrap_or(0.0);
        let current_volume_ml = self.store.get_f64(KEY_CURRENT_VOLUME)?.unwrap_or(0.0);
        let last_saved = self.store.get_timestamp(KEY_LAST_SAVED_DATE)?;

        let same_day = last_saved
            .map(|saved| saved.with_timezone(&Local).date_naive() == now.date_naive())
            .unwrap_or(false);

        let total_intake_ml = if same_day {
            stored_total.max(0.0)
        } else {
            if stored_total > 0.0 {
                info!("🌅 New day since last save - discarding stored total of {:.1} mL", stored_total);
            }
            0.0
        };

        if stored_total < 0.0 {
            warn!("Stored total intake was negative ({:.1}) - clamped to 0", stored_total);
        }

        Ok(RestoredIntake {
            total_intake_ml,
            refill_amount_ml,
            current_volume_ml,
            rolled_over: !same_day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).earliest().unwrap()
    }

    fn snapshot(total: f64) -> IntakeSnapshot {
        IntakeSnapshot {
            total_intake_ml: total,
            current_volume_ml: 350.0,
            refill_amount_ml: 750.0,
            is_refill_mode: false,
        }
    }

    #[test]
    fn test_same_day_restores_total() {
        let mut store = SnapshotStore::new(MemoryStore::new());
        store.save_at(&snapshot(1500.0), noon()).unwrap();

        let restored = store.load_at(noon() + Duration::hours(3)).unwrap();
        assert_eq!(restored.total_intake_ml, 1500.0);
        assert_eq!(restored.refill_amount_ml, 750.0);
        assert_eq!(restored.current_volume_ml, 350.0);
        assert!(!restored.rolled_over);
    }

    #[test]
    fn test_previous_day_rolls_over() {
        let mut store = SnapshotStore::new(MemoryStore::new());
        store.save_at(&snapshot(1500.0), noon() - Duration::days(1)).unwrap();

        let restored = store.load_at(noon()).unwrap();
        assert_eq!(restored.total_intake_ml, 0.0);
        assert_eq!(restored.refill_amount_ml, 750.0);
        assert_eq!(restored.current_volume_ml, 350.0);
        assert!(restored.rolled_over);
    }

    #[test]
    fn test_missing_keys_default_to_zero() {
        let store = SnapshotStore::new(MemoryStore::new());
        let restored = store.load_at(noon()).unwrap();
        assert_eq!(restored.total_intake_ml, 0.0);
        assert_eq!(restored.refill_amount_ml, 0.0);
        assert_eq!(restored.current_volume_ml, 0.0);
    }

    #[test]
    fn test_missing_date_discards_total() {
        let mut memory = MemoryStore::new();
        memory.set_all(vec![(KEY_TOTAL_INTAKE, Value::from(900.0))]).unwrap();
        let store = SnapshotStore::new(memory);
        assert_eq!(store.load_at(noon()).unwrap().total_intake_ml, 0.0);
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let mut memory = MemoryStore::new();
        memory
            .set_all(vec![(KEY_LAST_SAVED_DATE, Value::from("yesterday"))])
            .unwrap();
        let store = SnapshotStore::new(memory);
        assert!(matches!(
            store.load_at(noon()),
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_json_file_store_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("sipwise-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("intake.json");

        {
            let mut store = SnapshotStore::new(JsonFileStore::open(&path).unwrap());
            store.save_at(&snapshot(640.0), noon()).unwrap();
        }

        let reopened = SnapshotStore::new(JsonFileStore::open(&path).unwrap());
        assert_eq!(reopened.load_at(noon()).unwrap().total_intake_ml, 640.0);

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[KEY_TOTAL_INTAKE], Value::from(640.0));
        assert!(raw[KEY_LAST_SAVED_DATE].is_string());
        assert!(!dir.join("intake.json.tmp").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
