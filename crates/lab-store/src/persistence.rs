//! One JSON file per collection inside a data directory.

use crate::StoreError;
use fs2::FileExt;
use lab_core::{defaults, Collection, Record, APP_CONFIG_FILE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_FILE: &str = ".lab-hub.lock";

/// Result of reading one persisted collection.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<T> {
    Loaded(T),
    Missing,
    Corrupt(String),
}

impl<T> LoadOutcome<T> {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, LoadOutcome::Corrupt(_))
    }
}

/// In-memory contents of every named collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collections {
    pub models: Vec<Record>,
    pub sensors: Vec<Record>,
    pub test_configurations: Vec<Value>,
    pub model_configs: Record,
    pub history: Vec<Record>,
    pub last_run: Record,
}

impl Collections {
    /// State of a fresh install.
    pub fn seeded() -> Self {
        Self {
            models: defaults::models(),
            sensors: defaults::sensors(),
            ..Self::default()
        }
    }

    /// Takes `collection` from `other`, leaving the rest untouched.
    pub(crate) fn adopt(&mut self, collection: Collection, other: &Collections) {
        match collection {
            Collection::Models => self.models = other.models.clone(),
            Collection::TestSensors => self.sensors = other.sensors.clone(),
            Collection::TestConfigurations => {
                self.test_configurations = other.test_configurations.clone()
            }
            Collection::ModelConfigs => self.model_configs = other.model_configs.clone(),
            Collection::TestRunHistory => self.history = other.history.clone(),
            Collection::LastRun => self.last_run = other.last_run.clone(),
        }
    }
}

pub struct JsonFileStore {
    dir: PathBuf,
    _lock: File,
}

impl JsonFileStore {
    /// Opens `dir`, creating it if needed, and takes an exclusive lock so no
    /// other process writes the same files.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|err| StoreError::io(&lock_path, err))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked { path: dir });
        }

        Ok(Self { dir, _lock: lock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }

    pub fn load<T: DeserializeOwned>(&self, collection: Collection) -> LoadOutcome<T> {
        read_json(&self.path_for(collection))
    }

    /// Loads a collection, substituting `default` when the file is missing or
    /// unreadable. Corrupt files are logged, never surfaced.
    pub fn load_or<T: DeserializeOwned>(&self, collection: Collection, default: T) -> T {
        match self.load(collection) {
            LoadOutcome::Loaded(value) => value,
            LoadOutcome::Missing => {
                debug!(event = "store_fallback", collection = %collection, reason = "missing");
                default
            }
            LoadOutcome::Corrupt(reason) => {
                warn!(event = "store_fallback", collection = %collection, reason = %reason);
                default
            }
        }
    }

    pub fn save<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        data: &T,
    ) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        write_json_atomic(&path, data)?;
        debug!(event = "collection_saved", collection = %collection, path = %path.display());
        Ok(())
    }

    /// Reads every collection in the fixed order, seeding anything absent.
    pub fn load_all(&self) -> Collections {
        let seed = Collections::seeded();
        Collections {
            models: self.load_or(Collection::Models, seed.models),
            sensors: self.load_or(Collection::TestSensors, seed.sensors),
            test_configurations: self
                .load_or(Collection::TestConfigurations, seed.test_configurations),
            model_configs: self.load_or(Collection::ModelConfigs, seed.model_configs),
            history: self.load_or(Collection::TestRunHistory, seed.history),
            last_run: self.load_or(Collection::LastRun, seed.last_run),
        }
    }

    pub fn save_all(&self, data: &Collections) -> Result<(), StoreError> {
        for collection in Collection::ALL {
            self.save_from(collection, data)?;
        }
        Ok(())
    }

    pub(crate) fn save_from(
        &self,
        collection: Collection,
        data: &Collections,
    ) -> Result<(), StoreError> {
        match collection {
            Collection::Models => self.save(collection, &data.models),
            Collection::TestSensors => self.save(collection, &data.sensors),
            Collection::TestConfigurations => self.save(collection, &data.test_configurations),
            Collection::ModelConfigs => self.save(collection, &data.model_configs),
            Collection::TestRunHistory => self.save(collection, &data.history),
            Collection::LastRun => self.save(collection, &data.last_run),
        }
    }

    pub fn app_config_path(&self) -> PathBuf {
        self.dir.join(APP_CONFIG_FILE)
    }

    /// App config lives outside the collection map and falls back to its own
    /// seed when absent, unreadable, or not an object.
    pub fn load_app_config(&self) -> Record {
        match read_json::<Value>(&self.app_config_path()) {
            LoadOutcome::Loaded(Value::Object(map)) => map,
            LoadOutcome::Loaded(other) => {
                warn!(
                    event = "store_fallback",
                    collection = "app_config",
                    reason = %format!("expected object, found {}", lab_core::json_type_name(&other))
                );
                defaults::app_config()
            }
            LoadOutcome::Missing => defaults::app_config(),
            LoadOutcome::Corrupt(reason) => {
                warn!(event = "store_fallback", collection = "app_config", reason = %reason);
                defaults::app_config()
            }
        }
    }

    pub fn save_app_config(&self, config: &Record) -> Result<(), StoreError> {
        write_json_atomic(&self.app_config_path(), config)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> LoadOutcome<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(err) => return LoadOutcome::Corrupt(format!("read {}: {err}", path.display())),
    };
    match serde_json::from_str(&content) {
        Ok(value) => LoadOutcome::Loaded(value),
        Err(err) => LoadOutcome::Corrupt(format!("parse {}: {err}", path.display())),
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<(), StoreError> {
    let payload = serde_json::to_string_pretty(data)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    fs::write(&temp_path, payload).map_err(|err| StoreError::io(&temp_path, err))?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io(path, err));
    }
    Ok(())
}
