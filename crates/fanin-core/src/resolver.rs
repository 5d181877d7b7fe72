//! Entry point used by trigger handling: settings plus one graph per call.

use crate::error::FaninResult;
use crate::graph::FaninGraph;
use crate::obs::{self, ResolutionSpan};
use crate::revision::MaterialRevisions;
use crate::services::{PipelineConfigView, ResolutionServices};
use crate::settings::ResolverSettings;

/// Resolves consistent material revisions for pipeline triggers.
///
/// Holds no per-trigger state; one resolver can serve concurrent triggers on
/// different threads.
#[derive(Debug, Clone, Default)]
pub struct FaninResolver {
    settings: ResolverSettings,
}

impl FaninResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(ResolverSettings::from_env())
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve the revisions `pipeline` should be triggered with.
    ///
    /// With revision compatibility enforcement switched off, `actual` is
    /// returned as is.
    pub fn resolve(
        &self,
        config: &dyn PipelineConfigView,
        pipeline: &str,
        actual: &MaterialRevisions,
        previous: Option<&MaterialRevisions>,
        services: ResolutionServices<'_>,
    ) -> FaninResult<MaterialRevisions> {
        let _span = ResolutionSpan::enter(pipeline);

        if !self.settings.enforce_revision_compatibility {
            obs::emit_resolution_bypassed(pipeline, "revision compatibility enforcement disabled");
            return Ok(actual.clone());
        }

        let result = FaninGraph::build(config, pipeline)
            .and_then(|graph| graph.compute_revisions(actual, previous, services, &self.settings));
        if let Err(err) = &result {
            obs::emit_resolution_failed(pipeline, err);
        }
        result
    }
}
