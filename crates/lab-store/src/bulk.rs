use crate::store::{stage_model_configs, stage_models, stage_sensors, stage_test_configurations};
use crate::{LabStore, StoreError};
use lab_core::validation::expect_object;
use lab_core::{Collection, ExportBundle, ModelConfigEntry};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkLoadSummary {
    pub replaced: Vec<Collection>,
}

impl LabStore {
    /// Replaces any of `models`, `sensors`, `mapping` and `modelConfigs` found
    /// in `payload`.
    ///
    /// Every present key is validated before anything is replaced: one bad key
    /// rejects the whole payload and leaves all collections as they were.
    /// Sensor uniqueness is not checked here. Each collection is swapped in
    /// memory right after its file is written, so a failed write part-way
    /// through leaves memory matching disk.
    pub fn load_all(&mut self, payload: &Value) -> Result<BulkLoadSummary, StoreError> {
        let payload = expect_object(payload, "bulk load")?;
        let models = payload.get("models").map(stage_models).transpose()?;
        let sensors = payload.get("sensors").map(stage_sensors).transpose()?;
        let mapping = payload
            .get("mapping")
            .map(stage_test_configurations)
            .transpose()?;
        let model_configs = payload
            .get("modelConfigs")
            .map(stage_model_configs)
            .transpose()?;

        let mut next = self.data.clone();
        let mut summary = BulkLoadSummary::default();
        if let Some(models) = models {
            next.models = models;
            summary.replaced.push(Collection::Models);
        }
        if let Some(sensors) = sensors {
            next.sensors = sensors;
            summary.replaced.push(Collection::TestSensors);
        }
        if let Some(mapping) = mapping {
            next.test_configurations = mapping;
            summary.replaced.push(Collection::TestConfigurations);
        }
        if let Some(model_configs) = model_configs {
            next.model_configs = model_configs;
            summary.replaced.push(Collection::ModelConfigs);
        }

        for collection in &summary.replaced {
            self.files.save_from(*collection, &next)?;
            self.data.adopt(*collection, &next);
        }
        Ok(summary)
    }

    /// Snapshot in the exact shape `load_all` accepts.
    pub fn export_all(&self) -> ExportBundle {
        ExportBundle {
            models: self.data.models.clone(),
            sensors: self.data.sensors.clone(),
            mapping: self.data.test_configurations.clone(),
            model_configs: self
                .data
                .model_configs
                .iter()
                .map(|(file, config)| ModelConfigEntry {
                    file: file.clone(),
                    config: config.clone(),
                })
                .collect(),
        }
    }
}
