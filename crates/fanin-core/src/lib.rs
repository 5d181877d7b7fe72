//! Fanin-Core: fan-in revision resolution for dependent CD pipelines
//!
//! When a pipeline depends on several upstream pipelines that share source
//! materials, triggering it with each upstream's latest run can mix
//! incompatible revisions. This crate walks upstream history backwards to
//! find one set of upstream runs that agree on every shared material.
//!
//! ## Key Components
//!
//! - `FaninGraph`: material graph of one pipeline, built per trigger
//! - `DependencyNode`: backtracking cursor over an upstream pipeline's history
//! - `FaninResolver`: settings-aware entry point used by triggers
//! - `services`: read-only collaborator traits (history, stages, modifications)

pub mod config;
mod error;
pub mod fakes;
pub mod graph;
pub mod material;
pub mod obs;
pub mod resolver;
pub mod revision;
pub mod services;
pub mod settings;
pub mod telemetry;
pub mod timeline;

pub use config::{ConfigSnapshot, PipelineConfig};
pub use error::{FaninError, FaninResult};
pub use graph::{
    DependencyNode, FaninGraph, FingerprintClassification, GraphContext, MaterialNode, NodeState,
    RevisionAlteration,
};
pub use material::{
    DependencyMaterialConfig, Fingerprint, MaterialConfig, PackageMaterialConfig,
    PluggableScmMaterialConfig, ScmKind, ScmMaterialConfig,
};
pub use resolver::FaninResolver;
pub use revision::{
    FaninScmMaterial, MaterialRevision, MaterialRevisions, Modification, ScmRevision,
    StageIdentifier,
};
pub use services::{
    ModificationRepository, PassedStageLookup, PipelineConfigView, PipelineHistory,
    ResolutionServices,
};
pub use settings::ResolverSettings;
pub use timeline::{EntryRevision, PipelineTimelineEntry};
