//! Error types for fan-in revision resolution.

use thiserror::Error;

/// Errors produced while building a fan-in graph or computing revisions.
///
/// Every variant is fatal for the trigger that produced it: resolution either
/// yields one consistent revision set or fails as a whole.
#[derive(Debug, Error)]
pub enum FaninError {
    /// An upstream pipeline has no instance whose scm view is internally
    /// consistent and matches the current configuration.
    #[error("no compatible revisions of upstream '{material}' found while resolving pipeline '{pipeline}'")]
    NoCompatibleUpstreamRevisions { pipeline: String, material: String },

    /// Reconciliation could not align an upstream with its siblings on a
    /// shared material within the available history.
    #[error("failed to find a revision of '{material}' compatible with its siblings while resolving pipeline '{pipeline}'")]
    FailedToFindCompatibleRevision { pipeline: String, material: String },

    /// A backward scan would pass the configured backtrack ceiling.
    #[error(
        "maximum backtrack limit of {limit} reached for '{material}' while resolving pipeline '{pipeline}'; \
         upstream pipelines are probably triggered at very different cadences"
    )]
    MaxBackTrackLimitReached {
        pipeline: String,
        material: String,
        limit: usize,
    },

    /// The chosen upstream stage has no recorded modifications.
    #[error("no modifications present for dependent stage {stage_locator}")]
    NoModificationsPresentForDependentMaterial { stage_locator: String },

    /// An scm material has neither caller-supplied nor recorded modifications.
    #[error("no modifications present for material '{material}'")]
    NoModificationsPresentForMaterial { material: String },

    /// The caller did not supply revisions for every direct dependency.
    #[error("actual revisions for pipeline '{pipeline}' do not include dependencies: {materials:?}")]
    MissingDependencyRevisions {
        pipeline: String,
        materials: Vec<String>,
    },

    /// A referenced pipeline is absent from the configuration snapshot.
    #[error("pipeline not found in configuration: {pipeline}")]
    PipelineNotFound { pipeline: String },

    /// Pipeline configuration contains a dependency cycle.
    #[error("dependency cycle detected involving pipelines: {pipelines:?}")]
    DependencyCycle { pipelines: Vec<String> },

    /// A stage locator is not of the form `pipeline/counter/stage/counter`.
    #[error("invalid stage locator: {locator}")]
    InvalidStageLocator { locator: String },

    /// A history or modification collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience result alias.
pub type FaninResult<T> = std::result::Result<T, FaninError>;
