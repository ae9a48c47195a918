use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub mod defaults;
pub mod validation;

pub use validation::ValidationError;

/// A free-form JSON object stored verbatim.
pub type Record = Map<String, Value>;

pub const DEFAULT_RUN_USER: &str = "Emma Wagner";

pub const LIVE_DATA_OPTIONS: [&str; 4] = ["TEMP_CHAMBER", "TEMP_DEVICE", "PRESSURE", "HUMIDITY"];

pub const APP_CONFIG_FILE: &str = "app_config.json";

/// Named collections mirrored one-to-one onto JSON files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Models,
    TestSensors,
    TestConfigurations,
    ModelConfigs,
    TestRunHistory,
    LastRun,
}

impl Collection {
    /// Fixed order used by batch load and save.
    pub const ALL: [Collection; 6] = [
        Collection::Models,
        Collection::TestSensors,
        Collection::TestConfigurations,
        Collection::ModelConfigs,
        Collection::TestRunHistory,
        Collection::LastRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Models => "models",
            Collection::TestSensors => "test_sensors",
            Collection::TestConfigurations => "test_configurations",
            Collection::ModelConfigs => "model_configs",
            Collection::TestRunHistory => "test_run_history",
            Collection::LastRun => "last_run",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::Models => "models.json",
            Collection::TestSensors => "test_sensors.json",
            Collection::TestConfigurations => "test_configurations.json",
            Collection::ModelConfigs => "model_configs.json",
            Collection::TestRunHistory => "test_run_history.json",
            Collection::LastRun => "last_run.json",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of the `modelConfigs` list used by bulk import and export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfigEntry {
    pub file: String,
    pub config: Value,
}

/// Full snapshot in the shape accepted by bulk load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportBundle {
    pub models: Vec<Record>,
    pub sensors: Vec<Record>,
    pub mapping: Vec<Value>,
    #[serde(rename = "modelConfigs")]
    pub model_configs: Vec<ModelConfigEntry>,
}

/// Returns the JSON type name used in shape errors.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Empty-ish request bodies (`null`, `false`, `0`, `""`, `[]`, `{}`) that
/// clients send to mean "nothing".
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
