use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::config::{DatasetConfig, EngineSettings, ScenarioConfig, Settings};
use crate::domain::contract::load_contract;
use crate::domain::path::PathTemplate;
use crate::domain::stub::{DEFAULT_SCENARIO, UNLIMITED_USES};
use crate::domain::StubDefinition;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

/// Accumulates every configuration problem instead of stopping at the first
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_engine(&settings.engine) {
            errors.extend(e);
        }

        if settings.logging.level.trim().is_empty() {
            errors.push(ValidationError::MissingField("logging.level".to_string()));
        }

        if let Err(e) = Self::validate_stubs(&settings.stubs) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_scenarios(&settings.scenarios) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_datasets(&settings.datasets) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_cross_references(settings) {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_engine(engine: &EngineSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if engine.default_scenario.trim().is_empty() {
            errors.push(ValidationError::MissingField("engine.default_scenario".to_string()));
        }

        for (field, value) in [
            ("engine.max_ref_depth", engine.max_ref_depth),
            ("engine.cas_max_retries", engine.cas_max_retries as usize),
            ("engine.request_log_capacity", engine.request_log_capacity),
        ] {
            if value == 0 {
                errors.push(ValidationError::InvalidValue {
                    field: field.to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_stubs(stubs: &[StubDefinition]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_ids = HashMap::new();

        for (idx, stub) in stubs.iter().enumerate() {
            if let Some(id) = &stub.id {
                if let Some(prev_idx) = seen_ids.insert(id, idx) {
                    errors.push(ValidationError::Duplicate(format!(
                        "Stub id '{}' appears at indices {} and {}",
                        id, prev_idx, idx
                    )));
                }
            }

            if stub.method.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("stubs[{}].method", idx)));
            }

            if let Err(reason) = PathTemplate::parse(&stub.path) {
                errors.push(ValidationError::InvalidValue {
                    field: format!("stubs[{}].path", idx),
                    reason,
                });
            }

            if stub.remaining_uses < UNLIMITED_USES {
                errors.push(ValidationError::InvalidValue {
                    field: format!("stubs[{}].remaining_uses", idx),
                    reason: "Must be -1 (unlimited) or non-negative".to_string(),
                });
            }

            if stub.scenario.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("stubs[{}].scenario", idx)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_scenarios(scenarios: &[ScenarioConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_names = HashMap::new();

        for (idx, scenario) in scenarios.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&scenario.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Scenario name '{}' appears at indices {} and {}",
                    scenario.name, prev_idx, idx
                )));
            }

            if scenario.name.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("scenarios[{}].name", idx)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_datasets(datasets: &[DatasetConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_names = HashMap::new();

        for (idx, dataset) in datasets.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&dataset.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Dataset name '{}' appears at indices {} and {}",
                    dataset.name, prev_idx, idx
                )));
            }

            for (rel_idx, relationship) in dataset.relationships.iter().enumerate() {
                for entity_type in [&relationship.source_entity_type, &relationship.target_entity_type] {
                    if !dataset.entities.contains_key(entity_type) {
                        errors.push(ValidationError::CrossReference(format!(
                            "datasets[{}].relationships[{}] references unknown entity type '{}'",
                            idx, rel_idx, entity_type
                        )));
                    }
                }
                if relationship.source_field.trim().is_empty() {
                    errors.push(ValidationError::MissingField(format!(
                        "datasets[{}].relationships[{}].sourceField",
                        idx, rel_idx
                    )));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_cross_references(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        // A scenario exists once a scenario file or a stub names it
        let mut known: BTreeSet<&str> = BTreeSet::from([DEFAULT_SCENARIO]);
        known.extend(settings.scenarios.iter().map(|s| s.name.as_str()));
        known.extend(settings.stubs.iter().map(|s| s.scenario.as_str()));
        if !known.contains(settings.engine.default_scenario.as_str()) {
            errors.push(ValidationError::CrossReference(format!(
                "engine.default_scenario '{}' is not defined by any scenario or stub",
                settings.engine.default_scenario
            )));
        }

        let schema_names: BTreeSet<&str> = settings
            .contract
            .as_ref()
            .map(|doc| doc.schemas.keys().map(String::as_str).collect())
            .unwrap_or_default();

        if let Some(document) = &settings.contract {
            if let Err(e) = load_contract(document.clone()) {
                errors.push(ValidationError::InvalidValue {
                    field: "contract".to_string(),
                    reason: e.to_string(),
                });
            }
        }

        for dataset in &settings.datasets {
            for (entity_type, entity) in &dataset.entities {
                let mut refs = BTreeSet::new();
                entity.schema.collect_refs(&mut refs);
                for name in refs.iter().filter(|name| !schema_names.contains(name.as_str())) {
                    errors.push(ValidationError::CrossReference(format!(
                        "dataset '{}' entity '{}' references unknown schema '{}'",
                        dataset.name, entity_type, name
                    )));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
