use crate::persistence::{Collections, JsonFileStore};
use crate::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use lab_core::validation::{
    expect_array, expect_object, into_records, resolve_reverse_index, validate_model,
    validate_models, validate_run, validate_sensor, validate_sensors,
};
use lab_core::{is_falsy, Collection, Record, ValidationError, DEFAULT_RUN_USER};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

/// Owns every named collection and mirrors each mutation to disk.
///
/// Mutations persist first and only then swap the in-memory value, so a failed
/// write leaves memory matching what is on disk.
pub struct LabStore {
    pub(crate) files: JsonFileStore,
    pub(crate) data: Collections,
    app_config: Record,
}

impl LabStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let files = JsonFileStore::open(dir)?;
        let data = files.load_all();
        let app_config = files.load_app_config();
        info!(
            event = "store_loaded",
            dir = %files.dir().display(),
            models = data.models.len(),
            sensors = data.sensors.len(),
            test_configurations = data.test_configurations.len(),
            model_configs = data.model_configs.len(),
            history = data.history.len()
        );
        Ok(Self {
            files,
            data,
            app_config,
        })
    }

    pub fn collections(&self) -> &Collections {
        &self.data
    }

    pub fn models(&self) -> &[Record] {
        &self.data.models
    }

    pub fn sensors(&self) -> &[Record] {
        &self.data.sensors
    }

    pub fn test_configurations(&self) -> &[Value] {
        &self.data.test_configurations
    }

    pub fn model_configs(&self) -> &Record {
        &self.data.model_configs
    }

    pub fn history(&self) -> &[Record] {
        &self.data.history
    }

    pub fn last_run(&self) -> &Record {
        &self.data.last_run
    }

    pub fn app_config(&self) -> &Record {
        &self.app_config
    }

    pub fn replace_models(&mut self, items: &Value) -> Result<(), StoreError> {
        let next = stage_models(items)?;
        commit(&self.files, Collection::Models, &mut self.data.models, next)
    }

    pub fn add_model(&mut self, item: &Value) -> Result<(), StoreError> {
        validate_model(item)?;
        let mut next = self.data.models.clone();
        next.extend(item.as_object().cloned());
        commit(&self.files, Collection::Models, &mut self.data.models, next)
    }

    pub fn replace_sensors(&mut self, items: &Value) -> Result<(), StoreError> {
        let next = stage_sensors(items)?;
        commit(&self.files, Collection::TestSensors, &mut self.data.sensors, next)
    }

    /// Appends one sensor. `unique_id` must not match any stored sensor.
    pub fn add_sensor(&mut self, item: &Value) -> Result<(), StoreError> {
        validate_sensor(item)?;
        let unique_id = &item["unique_id"];
        if self
            .data
            .sensors
            .iter()
            .any(|sensor| sensor.get("unique_id") == Some(unique_id))
        {
            return Err(ValidationError::DuplicateId {
                unique_id: display_id(unique_id),
            }
            .into());
        }
        let mut next = self.data.sensors.clone();
        next.extend(item.as_object().cloned());
        commit(&self.files, Collection::TestSensors, &mut self.data.sensors, next)
    }

    pub fn replace_test_configurations(&mut self, items: &Value) -> Result<(), StoreError> {
        let next = stage_test_configurations(items)?;
        commit(
            &self.files,
            Collection::TestConfigurations,
            &mut self.data.test_configurations,
            next,
        )
    }

    pub fn replace_model_configs(&mut self, entries: &Value) -> Result<(), StoreError> {
        let next = stage_model_configs(entries)?;
        commit(
            &self.files,
            Collection::ModelConfigs,
            &mut self.data.model_configs,
            next,
        )
    }

    /// Config stored for a model file, or an empty object.
    pub fn model_config(&self, file: &str) -> Value {
        self.data
            .model_configs
            .get(file)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Falsy configs (`null`, `[]`, `""`, ...) are stored as an empty object.
    pub fn set_model_config(&mut self, file: &str, config: Value) -> Result<(), StoreError> {
        let config = if is_falsy(&config) {
            Value::Object(Map::new())
        } else {
            config
        };
        let mut next = self.data.model_configs.clone();
        next.insert(file.to_string(), config);
        commit(
            &self.files,
            Collection::ModelConfigs,
            &mut self.data.model_configs,
            next,
        )
    }

    pub fn record_run(&mut self, request: &Value) -> Result<Record, StoreError> {
        self.record_run_at(request, Utc::now())
    }

    /// Overwrites the last run and appends a history entry stamped with `now`.
    /// Returns the appended entry.
    pub fn record_run_at(
        &mut self,
        request: &Value,
        now: DateTime<Utc>,
    ) -> Result<Record, StoreError> {
        validate_run(request)?;
        let file = request["file"].clone();
        let config_idx = request["config_idx"].clone();

        let mut last_run = Record::new();
        last_run.insert("file".to_string(), file.clone());
        last_run.insert("config_idx".to_string(), config_idx.clone());

        let user = match request.get("user") {
            Some(Value::Null) | None => Value::String(DEFAULT_RUN_USER.to_string()),
            Some(value) => value.clone(),
        };
        let mut entry = Record::new();
        entry.insert("file".to_string(), file);
        entry.insert("config_idx".to_string(), config_idx);
        entry.insert(
            "timestamp".to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        entry.insert("user".to_string(), user);
        if let Some(notes) = request.get("notes") {
            entry.insert("notes".to_string(), notes.clone());
        }

        let mut history = self.data.history.clone();
        history.push(entry.clone());
        commit(
            &self.files,
            Collection::TestRunHistory,
            &mut self.data.history,
            history,
        )?;
        commit(&self.files, Collection::LastRun, &mut self.data.last_run, last_run)?;
        Ok(entry)
    }

    /// Sets `field` on the history entry `reverse_index` steps back from the
    /// most recent one. Returns the amended entry.
    pub fn amend_history(
        &mut self,
        reverse_index: &Value,
        field: &str,
        value: Value,
    ) -> Result<Record, StoreError> {
        let position = resolve_reverse_index(reverse_index, self.data.history.len())?;
        let mut history = self.data.history.clone();
        history[position].insert(field.to_string(), value);
        let amended = history[position].clone();
        commit(
            &self.files,
            Collection::TestRunHistory,
            &mut self.data.history,
            history,
        )?;
        Ok(amended)
    }

    pub fn set_run_notes(
        &mut self,
        reverse_index: &Value,
        notes: Value,
    ) -> Result<Record, StoreError> {
        self.amend_history(reverse_index, "notes", notes)
    }

    /// Shallow merge: keys in `patch` overwrite, everything else is kept.
    pub fn update_app_config(&mut self, patch: &Value) -> Result<Record, StoreError> {
        let patch = expect_object(patch, "app config")?;
        let mut merged = self.app_config.clone();
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
        self.files.save_app_config(&merged)?;
        self.app_config = merged.clone();
        Ok(merged)
    }
}

fn commit<T: Serialize>(
    files: &JsonFileStore,
    collection: Collection,
    slot: &mut T,
    next: T,
) -> Result<(), StoreError> {
    files.save(collection, &next)?;
    *slot = next;
    Ok(())
}

fn display_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn stage_models(value: &Value) -> Result<Vec<Record>, ValidationError> {
    let items = expect_array(value, "models")?;
    validate_models(items)?;
    Ok(into_records(items))
}

pub(crate) fn stage_sensors(value: &Value) -> Result<Vec<Record>, ValidationError> {
    let items = expect_array(value, "sensors")?;
    validate_sensors(items)?;
    Ok(into_records(items))
}

pub(crate) fn stage_test_configurations(value: &Value) -> Result<Vec<Value>, ValidationError> {
    Ok(expect_array(value, "test configurations")?.to_vec())
}

/// Builds the keyed map from `[{file, config}, ...]`. Entries without a string
/// `file` or without `config` are skipped.
pub(crate) fn stage_model_configs(value: &Value) -> Result<Record, ValidationError> {
    let entries = expect_array(value, "model configs")?;
    let mut configs = Record::new();
    for entry in entries {
        let file = entry.get("file").and_then(Value::as_str);
        let config = entry.get("config");
        if let (Some(file), Some(config)) = (file, config) {
            configs.insert(file.to_string(), config.clone());
        }
    }
    Ok(configs)
}
