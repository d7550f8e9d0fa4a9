//! Model registry.
//!
//! Each stage has a closed set of registered models. A run's model names are
//! resolved to concrete adapters once, before any stage starts; an unknown
//! name fails the run up front.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use trapdata_models::Stage;

use crate::adapter::{Classifier, Localizer, StageAdapters};
use crate::client::InferenceClient;
use crate::error::{MlError, MlResult};
use crate::remote::{RemoteClassifier, RemoteLocalizer};
use crate::types::Device;

pub const DEFAULT_LOCALIZATION_MODEL: &str = "fasterrcnn_ami_traps_2021";
pub const DEFAULT_BINARY_MODEL: &str = "moth_nonmoth_2021";
pub const DEFAULT_SPECIES_MODEL: &str = "quebec_vermont_species_2022";

/// Models hosted by the inference service.
const SERVICE_CATALOG: &[(Stage, &str)] = &[
    (Stage::Localization, DEFAULT_LOCALIZATION_MODEL),
    (Stage::Localization, "fasterrcnn_mobilenet_2022"),
    (Stage::BinaryClassification, DEFAULT_BINARY_MODEL),
    (Stage::SpeciesClassification, DEFAULT_SPECIES_MODEL),
    (Stage::SpeciesClassification, "uk_denmark_species_2022"),
];

type LocalizerFactory = Arc<dyn Fn(Device) -> Arc<dyn Localizer> + Send + Sync>;
type ClassifierFactory = Arc<dyn Fn(Device) -> Arc<dyn Classifier> + Send + Sync>;

/// Model names chosen for a run, one per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub localization_model: String,
    pub binary_classification_model: String,
    pub species_classification_model: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            localization_model: DEFAULT_LOCALIZATION_MODEL.to_string(),
            binary_classification_model: DEFAULT_BINARY_MODEL.to_string(),
            species_classification_model: DEFAULT_SPECIES_MODEL.to_string(),
        }
    }
}

/// Registered adapter constructors per stage.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    localizers: BTreeMap<String, LocalizerFactory>,
    binary: BTreeMap<String, ClassifierFactory>,
    species: BTreeMap<String, ClassifierFactory>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the models hosted by the inference service.
    pub fn with_inference_service(client: Arc<InferenceClient>) -> Self {
        let mut registry = Self::new();
        for (stage, name) in SERVICE_CATALOG {
            let client = client.clone();
            let model = name.to_string();
            match stage {
                Stage::Localization => {
                    registry.register_localizer(*name, move |device| -> Arc<dyn Localizer> {
                        Arc::new(RemoteLocalizer::new(client.clone(), model.clone(), device))
                    });
                }
                Stage::BinaryClassification | Stage::SpeciesClassification => {
                    registry.insert_classifier(*stage, *name, move |device| -> Arc<dyn Classifier> {
                        Arc::new(RemoteClassifier::new(client.clone(), model.clone(), device))
                    });
                }
            }
        }
        registry
    }

    pub fn register_localizer<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Device) -> Arc<dyn Localizer> + Send + Sync + 'static,
    {
        self.localizers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a classifier for a classification stage.
    pub fn register_classifier<F>(
        &mut self,
        stage: Stage,
        name: impl Into<String>,
        factory: F,
    ) -> MlResult<&mut Self>
    where
        F: Fn(Device) -> Arc<dyn Classifier> + Send + Sync + 'static,
    {
        if stage == Stage::Localization {
            return Err(MlError::config("localization models are registered as localizers"));
        }
        self.insert_classifier(stage, name, factory);
        Ok(self)
    }

    fn insert_classifier<F>(&mut self, stage: Stage, name: impl Into<String>, factory: F)
    where
        F: Fn(Device) -> Arc<dyn Classifier> + Send + Sync + 'static,
    {
        let factory: ClassifierFactory = Arc::new(factory);
        if stage == Stage::SpeciesClassification {
            self.species.insert(name.into(), factory);
        } else {
            self.binary.insert(name.into(), factory);
        }
    }

    /// Registered model names for a stage, sorted.
    pub fn models(&self, stage: Stage) -> Vec<&str> {
        match stage {
            Stage::Localization => self.localizers.keys().map(String::as_str).collect(),
            Stage::BinaryClassification => self.binary.keys().map(String::as_str).collect(),
            Stage::SpeciesClassification => self.species.keys().map(String::as_str).collect(),
        }
    }

    /// Bind every stage to its selected adapter.
    pub fn resolve(&self, selection: &ModelSelection, device: Device) -> MlResult<StageAdapters> {
        let localizer = self
            .localizers
            .get(&selection.localization_model)
            .ok_or_else(|| MlError::UnknownModel {
                stage: Stage::Localization,
                name: selection.localization_model.clone(),
            })?;
        let binary = Self::lookup(
            &self.binary,
            Stage::BinaryClassification,
            &selection.binary_classification_model,
        )?;
        let species = Self::lookup(
            &self.species,
            Stage::SpeciesClassification,
            &selection.species_classification_model,
        )?;

        info!(
            localization = %selection.localization_model,
            binary = %selection.binary_classification_model,
            species = %selection.species_classification_model,
            %device,
            "Resolved stage adapters"
        );

        Ok(StageAdapters::new(
            localizer(device),
            binary(device),
            species(device),
        ))
    }

    fn lookup<'a>(
        factories: &'a BTreeMap<String, ClassifierFactory>,
        stage: Stage,
        name: &str,
    ) -> MlResult<&'a ClassifierFactory> {
        factories.get(name).ok_or_else(|| MlError::UnknownModel {
            stage,
            name: name.to_string(),
        })
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("localizers", &self.models(Stage::Localization))
            .field("binary", &self.models(Stage::BinaryClassification))
            .field("species", &self.models(Stage::SpeciesClassification))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InferenceClientConfig;

    fn service_registry() -> ModelRegistry {
        let client = InferenceClient::new(InferenceClientConfig::default()).unwrap();
        ModelRegistry::with_inference_service(Arc::new(client))
    }

    #[test]
    fn test_default_selection_resolves() {
        let adapters = service_registry()
            .resolve(&ModelSelection::default(), Device::Cpu)
            .unwrap();
        assert_eq!(adapters.localizer.name(), DEFAULT_LOCALIZATION_MODEL);
        assert_eq!(adapters.binary.name(), DEFAULT_BINARY_MODEL);
        assert_eq!(
            adapters.model_name(Stage::SpeciesClassification),
            DEFAULT_SPECIES_MODEL
        );
    }

    #[test]
    fn test_unknown_model_fails_resolution() {
        let selection = ModelSelection {
            species_classification_model: "panama_species".to_string(),
            ..Default::default()
        };
        let err = service_registry()
            .resolve(&selection, Device::Cpu)
            .unwrap_err();
        assert!(matches!(
            err,
            MlError::UnknownModel {
                stage: Stage::SpeciesClassification,
                ..
            }
        ));
    }

    #[test]
    fn test_stage_catalogs_are_separate() {
        let registry = service_registry();
        assert_eq!(
            registry.models(Stage::SpeciesClassification),
            vec![DEFAULT_SPECIES_MODEL, "uk_denmark_species_2022"]
        );
        assert!(!registry
            .models(Stage::BinaryClassification)
            .contains(&DEFAULT_SPECIES_MODEL));
    }

    #[test]
    fn test_classifier_cannot_register_for_localization() {
        let client = Arc::new(InferenceClient::new(InferenceClientConfig::default()).unwrap());
        let mut registry = ModelRegistry::new();
        let result = registry.register_classifier(Stage::Localization, "x", move |device| -> Arc<dyn Classifier> {
            Arc::new(RemoteClassifier::new(client.clone(), "x", device))
        });
        assert!(result.is_err());
    }
}
