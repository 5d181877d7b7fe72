//! Pipeline configuration as seen by the resolver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::material::{DependencyMaterialConfig, MaterialConfig};
use crate::services::PipelineConfigView;

/// A pipeline: ordered stages and the materials it consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub stages: Vec<String>,
    pub materials: Vec<MaterialConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, stages: Vec<String>, materials: Vec<MaterialConfig>) -> Self {
        Self {
            name: name.into(),
            stages,
            materials,
        }
    }

    pub fn first_stage(&self) -> Option<&str> {
        self.stages.first().map(String::as_str)
    }

    /// A dependency on this pipeline's first stage, used as the graph root.
    pub fn as_dependency_on_first_stage(&self) -> DependencyMaterialConfig {
        DependencyMaterialConfig::new(self.name.clone(), self.first_stage().unwrap_or_default())
    }
}

/// Immutable snapshot of all pipeline configurations, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSnapshot {
    pipelines: BTreeMap<String, PipelineConfig>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline. Re-registering a name replaces the old config.
    pub fn add(&mut self, pipeline: PipelineConfig) {
        self.pipelines.insert(pipeline.name.clone(), pipeline);
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl FromIterator<PipelineConfig> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = PipelineConfig>>(iter: I) -> Self {
        let mut snapshot = ConfigSnapshot::new();
        for pipeline in iter {
            snapshot.add(pipeline);
        }
        snapshot
    }
}

impl PipelineConfigView for ConfigSnapshot {
    fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(name)
    }
}
