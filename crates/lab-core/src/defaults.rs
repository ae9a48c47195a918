//! Seed data used when nothing has been persisted yet.

use crate::Record;
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub fn models() -> Vec<Record> {
    vec![
        record(json!({
            "name": "Model 1",
            "file": "model1.pkl",
            "description": "First test model."
        })),
        record(json!({
            "name": "Model 2",
            "file": "model2.pkl",
            "description": "Second test model."
        })),
    ]
}

pub fn sensors() -> Vec<Record> {
    vec![
        record(json!({
            "unique_id": "TEST_SEN_0001",
            "name": "Temperature Sensor",
            "description": "Measures temperature inside the test."
        })),
        record(json!({
            "unique_id": "TEST_SEN_0002",
            "name": "Pressure Sensor",
            "description": "Measures pressure inside the test."
        })),
    ]
}

pub fn app_config() -> Record {
    record(json!({ "test_chamber_page_name": "Test Chamber" }))
}
