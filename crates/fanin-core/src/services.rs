//! Read-only collaborators consumed by fan-in resolution.
//!
//! - `PipelineConfigView`: pipeline name -> configuration
//! - `PipelineHistory`: the pipeline timeline (instances and what they ran with)
//! - `PassedStageLookup`: latest passed run of a stage within an instance
//! - `ModificationRepository`: concrete change lists
//!
//! Implementations must tolerate concurrent reads; resolution never writes.
//! In-memory implementations live in the `fakes` module.

use crate::config::PipelineConfig;
use crate::error::FaninResult;
use crate::material::Fingerprint;
use crate::revision::{Modification, ScmRevision, StageIdentifier};
use crate::timeline::PipelineTimelineEntry;

/// Pipeline configuration lookup.
pub trait PipelineConfigView: Send + Sync {
    fn pipeline(&self, name: &str) -> Option<&PipelineConfig>;
}

/// Queryable record of pipeline instances.
pub trait PipelineHistory: Send + Sync {
    /// Number of recorded instances of `pipeline`.
    fn instance_count(&self, pipeline: &str) -> FaninResult<usize>;

    /// The instance `offset` positions back from the latest (0 is the latest).
    fn instance_for(&self, pipeline: &str, offset: usize)
        -> FaninResult<Option<PipelineTimelineEntry>>;

    /// The instance with the given pipeline counter.
    fn entry_for(&self, pipeline: &str, counter: u64) -> FaninResult<Option<PipelineTimelineEntry>>;
}

/// Lookup of passed stage runs.
pub trait PassedStageLookup: Send + Sync {
    /// The most recent passed run of `stage` within the pipeline instance with
    /// storage id `pipeline_id`, or `None` if the stage never passed there.
    fn latest_passed_stage(
        &self,
        pipeline_id: u64,
        stage: &str,
    ) -> FaninResult<Option<StageIdentifier>>;
}

/// Source of concrete modifications.
pub trait ModificationRepository: Send + Sync {
    /// Modifications recorded for a dependency stage run (newest first).
    fn modifications_for_stage(&self, stage: &StageIdentifier) -> FaninResult<Vec<Modification>>;

    /// Modifications of an scm material from `from` up to `to`, both
    /// inclusive, newest first. With no `from`, only `to` itself.
    fn modifications_between(
        &self,
        fingerprint: &Fingerprint,
        from: Option<&ScmRevision>,
        to: &ScmRevision,
    ) -> FaninResult<Vec<Modification>>;

    /// Most recent known modifications of an scm material, newest first.
    fn latest_modifications(&self, fingerprint: &Fingerprint) -> FaninResult<Vec<Modification>>;
}

/// The history-side collaborators one resolution needs.
#[derive(Clone, Copy)]
pub struct ResolutionServices<'a> {
    pub history: &'a dyn PipelineHistory,
    pub stages: &'a dyn PassedStageLookup,
    pub modifications: &'a dyn ModificationRepository,
}

impl<'a> ResolutionServices<'a> {
    pub fn new(
        history: &'a dyn PipelineHistory,
        stages: &'a dyn PassedStageLookup,
        modifications: &'a dyn ModificationRepository,
    ) -> Self {
        Self {
            history,
            stages,
            modifications,
        }
    }
}
