//! In-memory fakes for the resolution collaborators
//!
//! Provides `InMemoryHistory` and `InMemoryModifications`, which satisfy the
//! trait contracts without any external storage, and `PipelineFixture`, a
//! small builder that records pipeline runs the way a CD server would.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::{ConfigSnapshot, PipelineConfig};
use crate::error::FaninResult;
use crate::material::{DependencyMaterialConfig, Fingerprint, MaterialConfig, ScmMaterialConfig};
use crate::resolver::FaninResolver;
use crate::revision::{MaterialRevision, MaterialRevisions, Modification, ScmRevision, StageIdentifier};
use crate::services::{
    ModificationRepository, PassedStageLookup, PipelineConfigView, PipelineHistory,
    ResolutionServices,
};
use crate::settings::ResolverSettings;
use crate::timeline::{EntryRevision, PipelineTimelineEntry};

// ---------------------------------------------------------------------------
// InMemoryHistory
// ---------------------------------------------------------------------------

/// Pipeline timelines (oldest first) plus passed stage runs keyed by
/// pipeline instance id.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    timelines: HashMap<String, Vec<PipelineTimelineEntry>>,
    passed: HashMap<(u64, String), StageIdentifier>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instance to its pipeline's timeline.
    pub fn record(&mut self, entry: PipelineTimelineEntry) {
        self.timelines
            .entry(entry.pipeline_name.clone())
            .or_default()
            .push(entry);
    }

    /// Mark a stage run as passed within the instance with id `pipeline_id`.
    pub fn pass_stage(&mut self, pipeline_id: u64, stage: StageIdentifier) {
        self.passed
            .insert((pipeline_id, stage.stage_name.clone()), stage);
    }
}

impl PipelineHistory for InMemoryHistory {
    fn instance_count(&self, pipeline: &str) -> FaninResult<usize> {
        Ok(self.timelines.get(pipeline).map_or(0, Vec::len))
    }

    fn instance_for(
        &self,
        pipeline: &str,
        offset: usize,
    ) -> FaninResult<Option<PipelineTimelineEntry>> {
        let Some(timeline) = self.timelines.get(pipeline) else {
            return Ok(None);
        };
        Ok(timeline
            .len()
            .checked_sub(offset + 1)
            .and_then(|idx| timeline.get(idx))
            .cloned())
    }

    fn entry_for(&self, pipeline: &str, counter: u64) -> FaninResult<Option<PipelineTimelineEntry>> {
        Ok(self
            .timelines
            .get(pipeline)
            .and_then(|t| t.iter().find(|e| e.counter == counter))
            .cloned())
    }
}

impl PassedStageLookup for InMemoryHistory {
    fn latest_passed_stage(
        &self,
        pipeline_id: u64,
        stage: &str,
    ) -> FaninResult<Option<StageIdentifier>> {
        Ok(self.passed.get(&(pipeline_id, stage.to_string())).cloned())
    }
}

// ---------------------------------------------------------------------------
// InMemoryModifications
// ---------------------------------------------------------------------------

/// Scm modifications per fingerprint (oldest first) and modifications
/// recorded for dependency stage runs.
#[derive(Debug, Default)]
pub struct InMemoryModifications {
    scm: HashMap<Fingerprint, Vec<Modification>>,
    stages: HashMap<StageIdentifier, Vec<Modification>>,
}

impl InMemoryModifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new scm modification. Modifications must arrive in id order.
    pub fn add_scm(&mut self, fingerprint: Fingerprint, modification: Modification) {
        self.scm.entry(fingerprint).or_default().push(modification);
    }

    pub fn add_stage(&mut self, stage: StageIdentifier, modifications: Vec<Modification>) {
        self.stages.insert(stage, modifications);
    }

    pub fn remove_stage(&mut self, stage: &StageIdentifier) {
        self.stages.remove(stage);
    }
}

impl ModificationRepository for InMemoryModifications {
    fn modifications_for_stage(&self, stage: &StageIdentifier) -> FaninResult<Vec<Modification>> {
        Ok(self.stages.get(stage).cloned().unwrap_or_default())
    }

    fn modifications_between(
        &self,
        fingerprint: &Fingerprint,
        from: Option<&ScmRevision>,
        to: &ScmRevision,
    ) -> FaninResult<Vec<Modification>> {
        let Some(all) = self.scm.get(fingerprint) else {
            return Ok(Vec::new());
        };
        let lower = from.map_or(to.id, |f| f.id);
        Ok(all
            .iter()
            .rev()
            .filter(|m| m.id >= lower && m.id <= to.id)
            .cloned()
            .collect())
    }

    fn latest_modifications(&self, fingerprint: &Fingerprint) -> FaninResult<Vec<Modification>> {
        Ok(self
            .scm
            .get(fingerprint)
            .and_then(|all| all.last())
            .cloned()
            .into_iter()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// PipelineFixture
// ---------------------------------------------------------------------------

/// Builder for configuration and history used in resolution tests.
///
/// Every pipeline has a single stage named [`PipelineFixture::STAGE_NAME`].
/// Runs take one revision per configured material, positionally: an scm
/// revision name (previously checked in) or, for dependency materials, the
/// upstream stage locator returned by an earlier run.
///
/// # Panics
///
/// Fixture methods panic on misuse (unknown pipeline, unknown revision,
/// wrong number of revisions).
#[derive(Debug, Default)]
pub struct PipelineFixture {
    pub config: ConfigSnapshot,
    pub history: InMemoryHistory,
    pub modifications: InMemoryModifications,
    checkins: HashMap<(Fingerprint, String), Modification>,
    next_id: u64,
}

impl PipelineFixture {
    pub const STAGE_NAME: &'static str = "s";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn git(&self, url: &str) -> MaterialConfig {
        ScmMaterialConfig::git(url).into()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn clock(id: u64) -> DateTime<Utc> {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        base + Duration::minutes(id as i64)
    }

    /// Record scm modifications, oldest first.
    pub fn checkin(&mut self, material: &MaterialConfig, revisions: &[&str]) {
        let fingerprint = material.fingerprint();
        for revision in revisions {
            let id = self.next_id();
            let modification = Modification::new(id, *revision, Self::clock(id));
            self.checkins
                .insert((fingerprint.clone(), revision.to_string()), modification.clone());
            self.modifications.add_scm(fingerprint.clone(), modification);
        }
    }

    /// Record one scm modification with an explicit timestamp.
    pub fn checkin_at(&mut self, material: &MaterialConfig, revision: &str, modified_at: DateTime<Utc>) {
        let fingerprint = material.fingerprint();
        let id = self.next_id();
        let modification = Modification::new(id, revision, modified_at);
        self.checkins
            .insert((fingerprint.clone(), revision.to_string()), modification.clone());
        self.modifications.add_scm(fingerprint, modification);
    }

    /// Register (or replace) a single-stage pipeline and return a dependency
    /// material on it.
    pub fn add_pipeline(&mut self, name: &str, materials: Vec<MaterialConfig>) -> MaterialConfig {
        self.config.add(PipelineConfig::new(
            name,
            vec![Self::STAGE_NAME.to_string()],
            materials,
        ));
        DependencyMaterialConfig::new(name, Self::STAGE_NAME).into()
    }

    pub fn modification(&self, material: &MaterialConfig, revision: &str) -> Modification {
        self.checkins
            .get(&(material.fingerprint(), revision.to_string()))
            .cloned()
            .unwrap_or_else(|| panic!("revision {revision} was never checked in"))
    }

    pub fn scm_revision(&self, material: &MaterialConfig, revision: &str) -> ScmRevision {
        ScmRevision::from(&self.modification(material, revision))
    }

    fn record_run(&mut self, pipeline: &str, revisions: &[&str]) -> (u64, StageIdentifier) {
        let materials = self
            .config
            .pipeline(pipeline)
            .unwrap_or_else(|| panic!("pipeline {pipeline} is not configured"))
            .materials
            .clone();
        assert_eq!(
            materials.len(),
            revisions.len(),
            "one revision per material of {pipeline}"
        );

        let counter = self.history.instance_count(pipeline).unwrap_or_default() as u64 + 1;
        let id = self.next_id();
        let mut entry = PipelineTimelineEntry::new(pipeline, counter, id);
        for (material, revision) in materials.iter().zip(revisions) {
            let used = if material.is_dependency() {
                EntryRevision::Dependency(
                    revision
                        .parse()
                        .unwrap_or_else(|err| panic!("{err}")),
                )
            } else {
                EntryRevision::Scm(self.scm_revision(material, revision))
            };
            entry = entry.with_revision(material.fingerprint(), used);
        }
        self.history.record(entry);

        (id, StageIdentifier::new(pipeline, counter, Self::STAGE_NAME, 1))
    }

    /// Record a run whose stage passed and return its stage locator.
    pub fn run_and_pass(&mut self, pipeline: &str, revisions: &[&str]) -> String {
        let (id, stage) = self.record_run(pipeline, revisions);
        let locator = stage.stage_locator();
        let modification = Modification::new(id, locator.clone(), Self::clock(id));
        self.history.pass_stage(id, stage.clone());
        self.modifications.add_stage(stage, vec![modification]);
        locator
    }

    /// Record a run whose stage never passed.
    pub fn run_and_fail(&mut self, pipeline: &str, revisions: &[&str]) {
        self.record_run(pipeline, revisions);
    }

    pub fn forget_stage_modifications(&mut self, locator: &str) {
        let stage: StageIdentifier = locator.parse().unwrap_or_else(|err| panic!("{err}"));
        self.modifications.remove_stage(&stage);
    }

    /// Material revision of an scm material; `revisions` newest first.
    pub fn mr_scm(&self, material: &MaterialConfig, revisions: &[&str]) -> MaterialRevision {
        let modifications = revisions
            .iter()
            .map(|r| self.modification(material, r))
            .collect();
        MaterialRevision::new(material.clone(), modifications)
    }

    /// Material revision of a dependency material at a stage locator.
    pub fn mr_stage(&self, material: &MaterialConfig, locator: &str) -> MaterialRevision {
        let stage: StageIdentifier = locator.parse().unwrap_or_else(|err| panic!("{err}"));
        let modifications = self
            .modifications
            .modifications_for_stage(&stage)
            .unwrap_or_default();
        MaterialRevision::new(material.clone(), modifications)
    }

    pub fn services(&self) -> ResolutionServices<'_> {
        ResolutionServices::new(&self.history, &self.history, &self.modifications)
    }

    pub fn resolve(
        &self,
        pipeline: &str,
        actual: &MaterialRevisions,
        previous: Option<&MaterialRevisions>,
    ) -> FaninResult<MaterialRevisions> {
        self.resolve_with(ResolverSettings::default(), pipeline, actual, previous)
    }

    pub fn resolve_with(
        &self,
        settings: ResolverSettings,
        pipeline: &str,
        actual: &MaterialRevisions,
        previous: Option<&MaterialRevisions>,
    ) -> FaninResult<MaterialRevisions> {
        FaninResolver::new(settings).resolve(&self.config, pipeline, actual, previous, self.services())
    }
}
