//! Dependency nodes: iteration and backtracking over upstream history.
//!
//! A [`DependencyNode`] walks its upstream pipeline's instances from the
//! latest backwards, batch by batch, keeping a window of instances whose
//! transitive scm view is internally consistent and matches the current
//! configuration. Reconciliation then moves the node's current instance
//! backwards through that window with [`DependencyNode::set_revision_to`].

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::error::{FaninError, FaninResult};
use crate::graph::context::GraphContext;
use crate::graph::node::NodeLinks;
use crate::material::{DependencyMaterialConfig, Fingerprint, MaterialConfig};
use crate::obs;
use crate::revision::{FaninScmMaterial, StageIdentifier};
use crate::timeline::{EntryRevision, PipelineTimelineEntry};

/// Number of upstream instances scanned per window fill.
pub const WINDOW_BATCH_SIZE: usize = 5;

/// Lifecycle of a dependency node within one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    WindowFilling,
    Stable,
    Revising,
    Resolved,
    Failed,
}

/// Outcome of [`DependencyNode::set_revision_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionAlteration {
    SameAsCurrent,
    Altered,
    /// The node does not see the target's material.
    NotApplicable,
    /// The window holds no compatible instance yet but history does; refill
    /// and retry.
    NeedMoreRevisions,
    AllOptionsExhausted,
}

#[derive(Debug)]
struct WindowEntry {
    stage: StageIdentifier,
    materials: HashSet<FaninScmMaterial>,
}

/// Buffered cursor over upstream instances, newest first.
#[derive(Debug, Default)]
struct RevisionWindow {
    entries: Vec<WindowEntry>,
    /// Index of the current revision in `entries`.
    current: Option<usize>,
    /// Instances consumed so far.
    current_count: usize,
    /// Instances that may be consumed; lowered on configuration drift.
    total_instance_count: usize,
}

/// Scm materials one upstream instance transitively implies, possibly with
/// duplicates reached through different paths.
struct InstanceView {
    stage: StageIdentifier,
    observed: Vec<FaninScmMaterial>,
}

impl InstanceView {
    /// Deduplicate by fingerprint, or `None` if two paths disagree.
    fn into_consistent_materials(self) -> Option<HashSet<FaninScmMaterial>> {
        let mut materials: HashSet<FaninScmMaterial> = HashSet::with_capacity(self.observed.len());
        for material in self.observed {
            match materials.get(&material.fingerprint) {
                Some(existing) if existing.revision != material.revision => return None,
                Some(_) => {}
                None => {
                    materials.insert(material);
                }
            }
        }
        Some(materials)
    }
}

/// A node wrapping a dependency on an upstream pipeline stage.
#[derive(Debug)]
pub struct DependencyNode {
    dependency: DependencyMaterialConfig,
    material: MaterialConfig,
    fingerprint: Fingerprint,
    links: NodeLinks,
    /// Scm fingerprints reachable beneath this dependency in the current
    /// configuration.
    configured_scm: BTreeSet<Fingerprint>,
    window: RevisionWindow,
    state: NodeState,
}

impl DependencyNode {
    pub fn new(dependency: DependencyMaterialConfig) -> Self {
        let material = MaterialConfig::Dependency(dependency.clone());
        let fingerprint = material.fingerprint();
        Self {
            dependency,
            material,
            fingerprint,
            links: NodeLinks::default(),
            configured_scm: BTreeSet::new(),
            window: RevisionWindow::default(),
            state: NodeState::Uninitialized,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn material(&self) -> &MaterialConfig {
        &self.material
    }

    pub fn display_name(&self) -> String {
        self.material.display_name()
    }

    pub fn links(&self) -> &NodeLinks {
        &self.links
    }

    pub(crate) fn links_mut(&mut self) -> &mut NodeLinks {
        &mut self.links
    }

    pub fn configured_scm(&self) -> &BTreeSet<Fingerprint> {
        &self.configured_scm
    }

    pub fn set_configured_scm(&mut self, fingerprints: BTreeSet<Fingerprint>) {
        self.configured_scm = fingerprints;
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn current_count(&self) -> usize {
        self.window.current_count
    }

    pub fn total_instance_count(&self) -> usize {
        self.window.total_instance_count
    }

    pub fn window_len(&self) -> usize {
        self.window.entries.len()
    }

    pub fn current_revision(&self) -> Option<&StageIdentifier> {
        self.current_entry().map(|entry| &entry.stage)
    }

    /// Scm materials implied by the current revision.
    pub fn current_materials(&self) -> Option<&HashSet<FaninScmMaterial>> {
        self.current_entry().map(|entry| &entry.materials)
    }

    fn current_entry(&self) -> Option<&WindowEntry> {
        self.window.current.and_then(|idx| self.window.entries.get(idx))
    }

    /// Fill the window from the latest upstream instance and select the most
    /// recent usable instance as the current revision.
    pub fn populate_revisions(&mut self, ctx: &GraphContext<'_>) -> FaninResult<()> {
        let result = self.try_populate_revisions(ctx);
        self.track(result)
    }

    fn try_populate_revisions(&mut self, ctx: &GraphContext<'_>) -> FaninResult<()> {
        self.state = NodeState::WindowFilling;
        let instance_count = ctx.history.instance_count(&self.dependency.pipeline_name)?;
        self.window = RevisionWindow {
            total_instance_count: instance_count,
            ..RevisionWindow::default()
        };

        while self.window.entries.is_empty() && self.has_more_instances(ctx)? {
            self.fill_window(ctx)?;
        }
        if self.window.entries.is_empty() {
            return Err(FaninError::NoCompatibleUpstreamRevisions {
                pipeline: ctx.pipeline.to_string(),
                material: self.display_name(),
            });
        }

        self.window.current = Some(0);
        self.state = NodeState::Stable;
        Ok(())
    }

    /// Scan the next batch of upstream instances into the window.
    pub fn fill_next_revisions(&mut self, ctx: &GraphContext<'_>) -> FaninResult<()> {
        let resume = match self.state {
            NodeState::Revising => NodeState::Revising,
            _ => NodeState::Stable,
        };
        self.state = NodeState::WindowFilling;
        let result = self.fill_window(ctx);
        if result.is_ok() && self.window.current.is_some() {
            self.state = resume;
        }
        self.track(result)
    }

    fn fill_window(&mut self, ctx: &GraphContext<'_>) -> FaninResult<()> {
        let name = self.display_name();
        let mut scanned = 0;
        let mut usable = 0;

        for _ in 0..WINDOW_BATCH_SIZE {
            // Only a caller that needs an older instance fails at the limit.
            if self.window.current_count >= ctx.max_backtrack_limit
                || !self.has_more_instances(ctx)?
            {
                break;
            }
            let offset = self.window.current_count;
            self.window.current_count += 1;
            scanned += 1;

            let Some(view) = self.instance_view(offset, ctx)? else {
                continue;
            };
            let stage = view.stage.clone();
            let Some(materials) = view.into_consistent_materials() else {
                obs::emit_inconsistent_instance_skipped(&name, &stage);
                continue;
            };
            if !self.matches_configuration(&materials) {
                self.window.total_instance_count = self.window.current_count;
                obs::emit_config_drift(&name, &stage, self.window.total_instance_count);
                break;
            }
            self.window.entries.push(WindowEntry { stage, materials });
            usable += 1;
        }

        obs::emit_window_filled(&name, scanned, self.window.total_instance_count, usable);
        Ok(())
    }

    fn matches_configuration(&self, materials: &HashSet<FaninScmMaterial>) -> bool {
        materials.len() == self.configured_scm.len()
            && materials
                .iter()
                .all(|m| self.configured_scm.contains(&m.fingerprint))
    }

    /// Collect the scm materials the instance `offset` positions back from the
    /// latest transitively implies. Instances whose stage never passed yield
    /// `None`.
    fn instance_view(
        &self,
        offset: usize,
        ctx: &GraphContext<'_>,
    ) -> FaninResult<Option<InstanceView>> {
        let Some(entry) = ctx
            .history
            .instance_for(&self.dependency.pipeline_name, offset)?
        else {
            return Ok(None);
        };
        let Some(stage) = ctx
            .stages
            .latest_passed_stage(entry.id, &self.dependency.stage_name)?
        else {
            return Ok(None);
        };

        let mut observed = Vec::new();
        let mut visited: HashSet<(String, u64)> = HashSet::new();
        visited.insert((entry.pipeline_name.clone(), entry.counter));
        let mut queue = VecDeque::new();
        collect_revisions(&entry, ctx, &mut observed, &mut visited, &mut queue);

        while let Some(upstream) = queue.pop_front() {
            match ctx
                .history
                .entry_for(&upstream.pipeline_name, upstream.pipeline_counter)?
            {
                Some(upstream_entry) => {
                    collect_revisions(&upstream_entry, ctx, &mut observed, &mut visited, &mut queue)
                }
                None => debug!(
                    material = %self.display_name(),
                    upstream = %upstream,
                    "upstream instance missing from history"
                ),
            }
        }

        Ok(Some(InstanceView { stage, observed }))
    }

    /// Move the current revision back to the most recent window entry whose
    /// revision of `target`'s material is at or before the target revision.
    pub fn set_revision_to(
        &mut self,
        target: &FaninScmMaterial,
        ctx: &GraphContext<'_>,
    ) -> FaninResult<RevisionAlteration> {
        let result = self.try_set_revision_to(target, ctx);
        self.track(result)
    }

    fn try_set_revision_to(
        &mut self,
        target: &FaninScmMaterial,
        ctx: &GraphContext<'_>,
    ) -> FaninResult<RevisionAlteration> {
        let Some(current) = self.window.current else {
            return Ok(RevisionAlteration::NotApplicable);
        };
        if !self.window.entries[current]
            .materials
            .contains(&target.fingerprint)
        {
            return Ok(RevisionAlteration::NotApplicable);
        }
        self.state = NodeState::Revising;

        let found = self.window.entries[current..]
            .iter()
            .position(|entry| {
                entry
                    .materials
                    .get(&target.fingerprint)
                    .is_some_and(|m| m.revision <= target.revision)
            })
            .map(|pos| pos + current);

        match found {
            Some(idx) if idx == current => {
                self.state = NodeState::Stable;
                Ok(RevisionAlteration::SameAsCurrent)
            }
            Some(idx) => {
                obs::emit_node_revision_altered(
                    &self.display_name(),
                    &self.window.entries[current].stage,
                    &self.window.entries[idx].stage,
                );
                self.window.current = Some(idx);
                self.state = NodeState::Stable;
                Ok(RevisionAlteration::Altered)
            }
            None => {
                if self.has_more_instances(ctx)? {
                    Ok(RevisionAlteration::NeedMoreRevisions)
                } else {
                    self.state = NodeState::Failed;
                    Ok(RevisionAlteration::AllOptionsExhausted)
                }
            }
        }
    }

    /// Whether unscanned instances remain under the ceiling. Fails once the
    /// backtrack limit is reached with instances still left.
    pub fn has_more_instances(&mut self, ctx: &GraphContext<'_>) -> FaninResult<bool> {
        if self.window.current_count >= self.window.total_instance_count {
            return Ok(false);
        }
        if self.window.current_count >= ctx.max_backtrack_limit {
            self.state = NodeState::Failed;
            return Err(FaninError::MaxBackTrackLimitReached {
                pipeline: ctx.pipeline.to_string(),
                material: self.display_name(),
                limit: ctx.max_backtrack_limit,
            });
        }
        Ok(true)
    }

    /// Freeze the node at its current revision.
    pub fn resolve(&mut self) -> Option<&StageIdentifier> {
        self.window.current?;
        self.state = NodeState::Resolved;
        self.current_revision()
    }

    fn track<T>(&mut self, result: FaninResult<T>) -> FaninResult<T> {
        if result.is_err() {
            self.state = NodeState::Failed;
        }
        result
    }
}

/// Breadth-first step: record classified scm revisions of `entry` and queue
/// each not yet visited upstream instance.
fn collect_revisions(
    entry: &PipelineTimelineEntry,
    ctx: &GraphContext<'_>,
    observed: &mut Vec<FaninScmMaterial>,
    visited: &mut HashSet<(String, u64)>,
    queue: &mut VecDeque<StageIdentifier>,
) {
    for (fingerprint, revision) in entry.primary_revisions() {
        match revision {
            EntryRevision::Scm(scm) if ctx.classification.is_scm(fingerprint) => {
                observed.push(FaninScmMaterial::new(fingerprint.clone(), scm.clone()));
            }
            EntryRevision::Dependency(stage) if ctx.classification.is_dependency(fingerprint) => {
                if visited.insert((stage.pipeline_name.clone(), stage.pipeline_counter)) {
                    queue.push_back(stage.clone());
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::PipelineFixture;
    use crate::graph::context::FingerprintClassification;
    use crate::material::ScmMaterialConfig;

    fn git(url: &str) -> MaterialConfig {
        ScmMaterialConfig::git(url).into()
    }

    fn classification(scm: &[&MaterialConfig], deps: &[&MaterialConfig]) -> FingerprintClassification {
        let mut c = FingerprintClassification::default();
        for m in scm {
            c.add_scm(m.fingerprint());
        }
        for m in deps {
            c.add_dependency(m.fingerprint());
        }
        c
    }

    fn node_for(up: &MaterialConfig, scm: &[&MaterialConfig]) -> DependencyNode {
        let dependency = up.as_dependency().cloned().expect("dependency material");
        let mut node = DependencyNode::new(dependency);
        node.set_configured_scm(scm.iter().map(|m| m.fingerprint()).collect());
        node
    }

    fn ctx<'a>(
        fx: &'a PipelineFixture,
        classification: &'a FingerprintClassification,
        limit: usize,
    ) -> GraphContext<'a> {
        GraphContext {
            pipeline: "down",
            history: &fx.history,
            stages: &fx.history,
            classification,
            max_backtrack_limit: limit,
        }
    }

    fn target(fx: &PipelineFixture, material: &MaterialConfig, revision: &str) -> FaninScmMaterial {
        FaninScmMaterial::new(material.fingerprint(), fx.scm_revision(material, revision))
    }

    #[test]
    fn test_populate_selects_latest_and_scans_one_batch() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        fx.checkin(&g, &["g1", "g2", "g3", "g4", "g5", "g6", "g7"]);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        for rev in ["g1", "g2", "g3", "g4", "g5", "g6", "g7"] {
            fx.run_and_pass("up", &[rev]);
        }

        let c = classification(&[&g], &[&up]);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&ctx(&fx, &c, 100)).unwrap();

        assert_eq!(node.state(), NodeState::Stable);
        assert_eq!(node.current_revision().unwrap().stage_locator(), "up/7/s/1");
        assert_eq!(node.current_count(), WINDOW_BATCH_SIZE);
        assert_eq!(node.window_len(), WINDOW_BATCH_SIZE);
        assert_eq!(node.total_instance_count(), 7);
    }

    #[test]
    fn test_never_run_upstream_has_no_compatible_revisions() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        let up = fx.add_pipeline("up", vec![g.clone()]);
        let c = classification(&[&g], &[&up]);
        let mut node = node_for(&up, &[&g]);

        let err = node.populate_revisions(&ctx(&fx, &c, 100)).unwrap_err();
        assert!(matches!(err, FaninError::NoCompatibleUpstreamRevisions { .. }));
        assert_eq!(node.state(), NodeState::Failed);
    }

    #[test]
    fn test_failed_stage_instances_are_skipped() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        fx.checkin(&g, &["g1", "g2"]);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        fx.run_and_pass("up", &["g1"]);
        fx.run_and_fail("up", &["g2"]);

        let c = classification(&[&g], &[&up]);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&ctx(&fx, &c, 100)).unwrap();
        assert_eq!(node.current_revision().unwrap().stage_locator(), "up/1/s/1");
        assert_eq!(node.window_len(), 1);
    }

    #[test]
    fn test_config_drift_lowers_ceiling() {
        let mut fx = PipelineFixture::new();
        let g1 = git("g1");
        let g2 = git("g2");
        fx.checkin(&g1, &["a1", "a2", "a3"]);
        fx.checkin(&g2, &["b1"]);
        fx.add_pipeline("up", vec![g1.clone()]);
        fx.run_and_pass("up", &["a1"]);
        fx.run_and_pass("up", &["a2"]);
        let up = fx.add_pipeline("up", vec![g1.clone(), g2.clone()]);
        fx.run_and_pass("up", &["a3", "b1"]);

        let c = classification(&[&g1, &g2], &[&up]);
        let mut node = node_for(&up, &[&g1, &g2]);
        node.populate_revisions(&ctx(&fx, &c, 100)).unwrap();

        assert_eq!(node.window_len(), 1);
        assert_eq!(node.total_instance_count(), 2);
        assert_eq!(node.current_count(), 2);
    }

    #[test]
    fn test_set_revision_to_moves_back_and_reports_outcomes() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        let other = git("other");
        fx.checkin(&g, &["g1", "g2", "g3"]);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        fx.run_and_pass("up", &["g1"]);
        fx.run_and_pass("up", &["g3"]);

        let c = classification(&[&g], &[&up]);
        let context = ctx(&fx, &c, 100);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&context).unwrap();

        let unrelated = FaninScmMaterial::new(other.fingerprint(), fx.scm_revision(&g, "g1"));
        assert_eq!(
            node.set_revision_to(&unrelated, &context).unwrap(),
            RevisionAlteration::NotApplicable
        );
        assert_eq!(
            node.set_revision_to(&target(&fx, &g, "g3"), &context).unwrap(),
            RevisionAlteration::SameAsCurrent
        );
        assert_eq!(
            node.set_revision_to(&target(&fx, &g, "g2"), &context).unwrap(),
            RevisionAlteration::Altered
        );
        assert_eq!(node.current_revision().unwrap().stage_locator(), "up/1/s/1");
        assert_eq!(node.state(), NodeState::Stable);
    }

    #[test]
    fn test_set_revision_to_exhausts_when_nothing_older_exists() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        fx.checkin(&g, &["g1", "g2"]);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        fx.run_and_pass("up", &["g2"]);

        let c = classification(&[&g], &[&up]);
        let context = ctx(&fx, &c, 100);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&context).unwrap();

        assert_eq!(
            node.set_revision_to(&target(&fx, &g, "g1"), &context).unwrap(),
            RevisionAlteration::AllOptionsExhausted
        );
        assert_eq!(node.state(), NodeState::Failed);
    }

    #[test]
    fn test_set_revision_to_asks_for_more_then_finds_older_instance() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        let revs = ["g1", "g2", "g3", "g4", "g5", "g6", "g7"];
        fx.checkin(&g, &revs);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        for rev in revs {
            fx.run_and_pass("up", &[rev]);
        }

        let c = classification(&[&g], &[&up]);
        let context = ctx(&fx, &c, 100);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&context).unwrap();

        let g1 = target(&fx, &g, "g1");
        assert_eq!(
            node.set_revision_to(&g1, &context).unwrap(),
            RevisionAlteration::NeedMoreRevisions
        );
        node.fill_next_revisions(&context).unwrap();
        assert_eq!(node.state(), NodeState::Revising);
        assert_eq!(
            node.set_revision_to(&g1, &context).unwrap(),
            RevisionAlteration::Altered
        );
        assert_eq!(node.current_revision().unwrap().stage_locator(), "up/1/s/1");
        assert_eq!(node.resolve().unwrap().stage_locator(), "up/1/s/1");
        assert_eq!(node.state(), NodeState::Resolved);
    }

    #[test]
    fn test_backtrack_limit_stops_scan_at_ceiling() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        fx.checkin(&g, &["g1", "g2", "g3", "g4"]);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        for _ in 0..4 {
            fx.run_and_fail("up", &["g1"]);
        }

        let c = classification(&[&g], &[&up]);
        let mut node = node_for(&up, &[&g]);
        let err = node.populate_revisions(&ctx(&fx, &c, 2)).unwrap_err();
        assert!(matches!(err, FaninError::MaxBackTrackLimitReached { limit: 2, .. }));
        assert_eq!(node.current_count(), 2);
        assert_eq!(node.state(), NodeState::Failed);
    }

    #[test]
    fn test_backtrack_limit_ends_batch_and_fails_only_on_demand() {
        let mut fx = PipelineFixture::new();
        let g = git("g");
        fx.checkin(&g, &["g1", "g2", "g3", "g4"]);
        let up = fx.add_pipeline("up", vec![g.clone()]);
        for rev in ["g1", "g2", "g3", "g4"] {
            fx.run_and_pass("up", &[rev]);
        }

        let c = classification(&[&g], &[&up]);
        let context = ctx(&fx, &c, 3);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&context).unwrap();
        assert_eq!(node.current_revision().unwrap().stage_locator(), "up/4/s/1");
        assert_eq!(node.current_count(), 3);
        assert_eq!(node.window_len(), 3);
        assert_eq!(node.state(), NodeState::Stable);

        assert_eq!(
            node.set_revision_to(&target(&fx, &g, "g2"), &context).unwrap(),
            RevisionAlteration::Altered
        );
        let err = node
            .set_revision_to(&target(&fx, &g, "g1"), &context)
            .unwrap_err();
        assert!(matches!(err, FaninError::MaxBackTrackLimitReached { limit: 3, .. }));
        assert_eq!(node.state(), NodeState::Failed);
    }

    #[test]
    fn test_inconsistent_instance_skipped_without_lowering_ceiling() {
        // up -> g and up -> mid -> g; up#2 used g2 directly but mid built with g1.
        let mut fx = PipelineFixture::new();
        let g = git("g");
        fx.checkin(&g, &["g1", "g2"]);
        let mid = fx.add_pipeline("mid", vec![g.clone()]);
        let up = fx.add_pipeline("up", vec![g.clone(), mid.clone()]);
        let mid_1 = fx.run_and_pass("mid", &["g1"]);
        fx.run_and_pass("up", &["g1", mid_1.as_str()]);
        fx.run_and_pass("up", &["g2", mid_1.as_str()]);

        let c = classification(&[&g], &[&up, &mid]);
        let mut node = node_for(&up, &[&g]);
        node.populate_revisions(&ctx(&fx, &c, 100)).unwrap();

        assert_eq!(node.current_revision().unwrap().stage_locator(), "up/1/s/1");
        assert_eq!(node.total_instance_count(), 2);
    }
}
