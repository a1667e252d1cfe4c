//! Key-value persistence for the navigation snapshot and the last known
//! position.
//!
//! Both records are JSON strings. Anything unreadable is treated as absent
//! and deleted, and expired records are dropped on load.

use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Coordinate, Destination, PositionFix, RouteResult};

pub const NAVIGATION_KEY: &str = "namma.navigation";
pub const LAST_LOCATION_KEY: &str = "namma.lastLocation";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        items.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key inside `dir`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Navigation snapshot as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNavigation {
    pub is_navigating: bool,
    pub destination: Option<Destination>,
    pub route_info: Option<RouteResult>,
    pub current_instruction_index: usize,
    pub routing_initiated: bool,
    pub user_location: Option<Coordinate>,
    pub map_bearing: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl PersistedNavigation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedLocation {
    lat: f64,
    lng: f64,
    #[serde(default)]
    accuracy: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
}

pub fn save_navigation(
    store: &dyn KeyValueStore,
    record: &PersistedNavigation,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(record).map_err(io::Error::from)?;
    store.set_item(NAVIGATION_KEY, &json)
}

pub fn clear_navigation(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store.remove_item(NAVIGATION_KEY)
}

/// Read the saved session, discarding it when corrupt or expired.
pub fn load_navigation(
    store: &dyn KeyValueStore,
    now: DateTime<Utc>,
) -> Result<Option<PersistedNavigation>, StoreError> {
    let Some(raw) = store.get_item(NAVIGATION_KEY)? else {
        return Ok(None);
    };

    let record: PersistedNavigation = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!("discarding corrupt navigation record: {}", err);
            store.remove_item(NAVIGATION_KEY)?;
            return Ok(None);
        }
    };

    if record.is_expired(now) || !record.is_navigating || record.destination.is_none() {
        tracing::info!("discarding stale navigation record from {}", record.timestamp);
        store.remove_item(NAVIGATION_KEY)?;
        return Ok(None);
    }

    Ok(Some(record))
}

pub fn save_last_location(store: &dyn KeyValueStore, fix: &PositionFix) -> Result<(), StoreError> {
    let cached = CachedLocation {
        lat: fix.lat,
        lng: fix.lng,
        accuracy: fix.accuracy,
        timestamp: fix.timestamp,
    };
    let json = serde_json::to_string(&cached).map_err(io::Error::from)?;
    store.set_item(LAST_LOCATION_KEY, &json)
}

/// Last known position, if younger than `ttl`.
pub fn load_last_location(
    store: &dyn KeyValueStore,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<Option<PositionFix>, StoreError> {
    let Some(raw) = store.get_item(LAST_LOCATION_KEY)? else {
        return Ok(None);
    };

    let cached: CachedLocation = match serde_json::from_str(&raw) {
        Ok(cached) => cached,
        Err(err) => {
            tracing::warn!("discarding corrupt location cache: {}", err);
            store.remove_item(LAST_LOCATION_KEY)?;
            return Ok(None);
        }
    };

    let fix = PositionFix {
        lat: cached.lat,
        lng: cached.lng,
        accuracy: cached.accuracy,
        timestamp: cached.timestamp,
    };
    if now - cached.timestamp > ttl || !fix.coordinate().is_valid() {
        store.remove_item(LAST_LOCATION_KEY)?;
        return Ok(None);
    }

    Ok(Some(fix))
}
