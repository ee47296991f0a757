//! Artifact catalog lookups.
//!
//! The catalog maps feature names to the artifacts declared by that feature.
//! The migration only reads the `events` section, to resolve a readable type
//! name for an event type id.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

use crate::converter::EventType;
use crate::error::{Error, Result};
use crate::guid::Guid;

/// One declared artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Generation of the artifact.
    pub generation: u32,
    /// Fully qualified type, optionally followed by `, <assembly>`.
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Artifacts keyed by artifact id.
pub type Artifacts = BTreeMap<String, Artifact>;

/// Artifacts declared by one feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    /// Commands.
    pub commands: Artifacts,
    /// Events.
    pub events: Artifacts,
    /// Event sources.
    pub event_sources: Artifacts,
    /// Read models.
    pub read_models: Artifacts,
    /// Queries.
    pub queries: Artifacts,
}

/// Feature name to [`Feature`] catalog, with an index of event type names.
#[derive(Debug, Clone, Default)]
pub struct ArtifactsMap {
    features: BTreeMap<String, Feature>,
    event_names: HashMap<Guid, String>,
}

impl ArtifactsMap {
    /// An empty catalog. Every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a catalog from already-typed features.
    #[must_use]
    pub fn new(features: BTreeMap<String, Feature>) -> Self {
        let mut event_names = HashMap::new();

        for (feature_name, feature) in &features {
            for (id, artifact) in &feature.events {
                match id.parse::<Guid>() {
                    Ok(id) => {
                        event_names
                            .entry(id)
                            .or_insert_with(|| short_type_name(&artifact.type_name).to_string());
                    }
                    Err(e) => debug!(feature = %feature_name, "Skipping event artifact: {}", e),
                }
            }
        }

        Self {
            features,
            event_names,
        }
    }

    /// Validates and builds a catalog from untyped JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArtifacts`] unless every feature declares all
    /// five artifact sections and every artifact has a numeric `generation`
    /// and a string `type`.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let features: BTreeMap<String, Feature> =
            serde_json::from_value(value).map_err(|e| Error::InvalidArtifacts(e.to_string()))?;
        Ok(Self::new(features))
    }

    /// Reads and validates a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or
    /// [`Error::InvalidArtifacts`] if it is not a valid catalog.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| Error::InvalidArtifacts(e.to_string()))?;
        Self::from_json(value)
    }

    /// Readable name of an event type, if the catalog declares it.
    ///
    /// Generations are not compared.
    #[must_use]
    pub fn find_event_type_name(&self, event_type: &EventType) -> Option<&str> {
        self.event_names.get(&event_type.id).map(String::as_str)
    }

    /// The features in the catalog.
    #[must_use]
    pub fn features(&self) -> &BTreeMap<String, Feature> {
        &self.features
    }
}

/// `"Domain.Things.ThingCreated, Domain"` becomes `"Domain.Things.ThingCreated"`.
fn short_type_name(type_name: &str) -> &str {
    type_name.split(',').next().unwrap_or(type_name)
}
