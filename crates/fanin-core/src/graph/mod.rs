//! Fan-in graph: construction from pipeline configuration and revision
//! computation.
//!
//! A [`FaninGraph`] is built once per trigger and consumed by
//! [`FaninGraph::compute_revisions`]. Nodes live in a fingerprint-keyed index
//! owned by the graph; parent/child links are fingerprint sets, so diamonds
//! share one node without shared ownership.

pub mod context;
pub mod dependency_node;
pub mod node;

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{FaninError, FaninResult};
use crate::material::{Fingerprint, MaterialConfig};
use crate::obs;
use crate::revision::{
    FaninScmMaterial, MaterialRevision, MaterialRevisions, Modification, ScmRevision,
};
use crate::services::{PipelineConfigView, ResolutionServices};
use crate::settings::ResolverSettings;

pub use context::{FingerprintClassification, GraphContext};
pub use dependency_node::{DependencyNode, NodeState, RevisionAlteration, WINDOW_BATCH_SIZE};
pub use node::{MaterialNode, NodeLinks, ScmLeafNode};

/// Material graph rooted at one pipeline.
#[derive(Debug)]
pub struct FaninGraph {
    pipeline: String,
    root: Fingerprint,
    /// Materials declared by the root pipeline, in configuration order.
    root_materials: Vec<MaterialConfig>,
    nodes: HashMap<Fingerprint, MaterialNode>,
    classification: FingerprintClassification,
    /// Per dependency fingerprint, the scm fingerprints reachable beneath it.
    scm_beneath: HashMap<Fingerprint, BTreeSet<Fingerprint>>,
}

impl FaninGraph {
    /// Build the material graph of `pipeline` from the configuration.
    pub fn build(config: &dyn PipelineConfigView, pipeline: &str) -> FaninResult<Self> {
        let pipeline_config = config
            .pipeline(pipeline)
            .ok_or_else(|| FaninError::PipelineNotFound {
                pipeline: pipeline.to_string(),
            })?;

        let root = MaterialNode::create(pipeline_config.as_dependency_on_first_stage().into());
        let root_fp = root.fingerprint().clone();

        let mut graph = Self {
            pipeline: pipeline.to_string(),
            root: root_fp.clone(),
            root_materials: pipeline_config.materials.clone(),
            nodes: HashMap::from([(root_fp.clone(), root)]),
            classification: FingerprintClassification::default(),
            scm_beneath: HashMap::new(),
        };

        let mut path = vec![pipeline.to_string()];
        let beneath = graph.build_beneath(config, pipeline_config, &root_fp, &mut path)?;
        graph.scm_beneath.insert(root_fp, beneath);

        debug!(
            pipeline = %pipeline,
            nodes = graph.nodes.len(),
            scm = graph.classification.scm_count(),
            dependencies = graph.classification.dependency_count(),
            "fan-in graph built"
        );
        Ok(graph)
    }

    /// Link every material of `pipeline_config` under `parent` and return the
    /// scm fingerprints reachable from them.
    fn build_beneath(
        &mut self,
        config: &dyn PipelineConfigView,
        pipeline_config: &PipelineConfig,
        parent: &Fingerprint,
        path: &mut Vec<String>,
    ) -> FaninResult<BTreeSet<Fingerprint>> {
        let mut beneath = BTreeSet::new();

        for material in &pipeline_config.materials {
            let fingerprint = self.link(parent, material);

            let Some(dependency) = material.as_dependency() else {
                self.classification.add_scm(fingerprint.clone());
                beneath.insert(fingerprint);
                continue;
            };
            self.classification.add_dependency(fingerprint.clone());

            if let Some(known) = self.scm_beneath.get(&fingerprint) {
                beneath.extend(known.iter().cloned());
                continue;
            }

            let upstream = &dependency.pipeline_name;
            if let Some(start) = path.iter().position(|p| p == upstream) {
                let mut pipelines = path[start..].to_vec();
                pipelines.push(upstream.clone());
                return Err(FaninError::DependencyCycle { pipelines });
            }
            let upstream_config =
                config
                    .pipeline(upstream)
                    .ok_or_else(|| FaninError::PipelineNotFound {
                        pipeline: upstream.clone(),
                    })?;

            path.push(upstream.clone());
            let upstream_scm = self.build_beneath(config, upstream_config, &fingerprint, path)?;
            path.pop();

            if let Some(MaterialNode::Dependency(node)) = self.nodes.get_mut(&fingerprint) {
                node.set_configured_scm(upstream_scm.clone());
            }
            beneath.extend(upstream_scm.iter().cloned());
            self.scm_beneath.insert(fingerprint, upstream_scm);
        }

        Ok(beneath)
    }

    /// Get or create the node for `material` and link it under `parent`.
    fn link(&mut self, parent: &Fingerprint, material: &MaterialConfig) -> Fingerprint {
        let fingerprint = material.fingerprint();
        self.nodes
            .entry(fingerprint.clone())
            .or_insert_with(|| MaterialNode::create(material.clone()))
            .links_mut()
            .add_parent(parent.clone());
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.links_mut().add_child(fingerprint.clone());
        }
        fingerprint
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn root(&self) -> &MaterialNode {
        &self.nodes[&self.root]
    }

    pub fn node(&self, fingerprint: &Fingerprint) -> Option<&MaterialNode> {
        self.nodes.get(fingerprint)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn classification(&self) -> &FingerprintClassification {
        &self.classification
    }

    /// Scm fingerprints reachable beneath a dependency node (or the root).
    pub fn scm_fingerprints_beneath(&self, fingerprint: &Fingerprint) -> Option<&BTreeSet<Fingerprint>> {
        self.scm_beneath.get(fingerprint)
    }

    /// Resolve one consistent set of material revisions for the root
    /// pipeline.
    ///
    /// `actual` holds the revisions the trigger would otherwise use and must
    /// include every direct dependency material. `previous` is the root's
    /// last build, used to compute modification spans and `changed` flags.
    pub fn compute_revisions(
        self,
        actual: &MaterialRevisions,
        previous: Option<&MaterialRevisions>,
        services: ResolutionServices<'_>,
        settings: &ResolverSettings,
    ) -> FaninResult<MaterialRevisions> {
        let children: Vec<Fingerprint> = self.root().links().children().to_vec();
        let dependency_children: Vec<&Fingerprint> = children
            .iter()
            .filter(|fp| self.classification.is_dependency(fp))
            .collect();

        let missing: Vec<String> = dependency_children
            .iter()
            .filter(|fp| !actual.contains(fp))
            .filter_map(|fp| self.nodes.get(*fp).map(|n| n.material().display_name()))
            .collect();
        if !missing.is_empty() {
            return Err(FaninError::MissingDependencyRevisions {
                pipeline: self.pipeline.clone(),
                materials: missing,
            });
        }

        if dependency_children.is_empty() {
            debug!(pipeline = %self.pipeline, "no upstream dependencies; using actual revisions");
            return Ok(actual.clone());
        }
        obs::emit_resolution_started(&self.pipeline, dependency_children.len());

        let FaninGraph {
            pipeline,
            root_materials,
            mut nodes,
            classification,
            ..
        } = self;

        let mut dependencies: Vec<DependencyNode> = Vec::new();
        let mut scm_leaves: Vec<MaterialConfig> = Vec::new();
        for fingerprint in &children {
            let Some(node) = nodes.remove(fingerprint) else {
                continue;
            };
            match node {
                MaterialNode::Dependency(dependency) => dependencies.push(dependency),
                MaterialNode::ScmLeaf(_) => {
                    let configured = root_materials
                        .iter()
                        .find(|m| &m.fingerprint() == fingerprint)
                        .unwrap_or_else(|| node.material());
                    scm_leaves.push(configured.clone());
                }
            }
        }

        let ctx = GraphContext {
            pipeline: &pipeline,
            history: services.history,
            stages: services.stages,
            classification: &classification,
            max_backtrack_limit: settings.max_backtrack_limit,
        };

        for dependency in &mut dependencies {
            dependency.populate_revisions(&ctx)?;
        }
        let rounds = reconcile(&mut dependencies, &ctx)?;

        let mut resolved = MaterialRevisions::new();
        for material in &scm_leaves {
            let revision = scm_revision(material, &dependencies, actual, previous, services)?;
            resolved.push(revision);
        }
        for dependency in &mut dependencies {
            let revision = dependency_revision(dependency, &ctx, actual, previous, services)?;
            resolved.push(revision);
        }

        obs::emit_resolution_finished(&pipeline, resolved.len(), rounds);
        Ok(resolved)
    }
}

/// Move dependency nodes back until every shared scm material agrees.
/// Returns the number of rounds it took.
fn reconcile(dependencies: &mut [DependencyNode], ctx: &GraphContext<'_>) -> FaninResult<usize> {
    let mut rounds = 0;

    while let Some(target) = earliest_disagreement(dependencies) {
        rounds += 1;
        obs::emit_revision_pinned(rounds, &target);

        let mut moved = false;
        for dependency in dependencies.iter_mut() {
            loop {
                match dependency.set_revision_to(&target, ctx)? {
                    RevisionAlteration::SameAsCurrent | RevisionAlteration::NotApplicable => break,
                    RevisionAlteration::Altered => {
                        moved = true;
                        break;
                    }
                    RevisionAlteration::NeedMoreRevisions => dependency.fill_next_revisions(ctx)?,
                    RevisionAlteration::AllOptionsExhausted => {
                        return Err(FaninError::FailedToFindCompatibleRevision {
                            pipeline: ctx.pipeline.to_string(),
                            material: dependency.display_name(),
                        });
                    }
                }
            }
        }

        if !moved {
            let stuck = dependencies
                .iter()
                .find(|d| {
                    d.current_materials()
                        .is_some_and(|m| m.contains(&target.fingerprint))
                })
                .map(DependencyNode::display_name)
                .unwrap_or_else(|| target.fingerprint.short().to_string());
            return Err(FaninError::FailedToFindCompatibleRevision {
                pipeline: ctx.pipeline.to_string(),
                material: stuck,
            });
        }
    }

    Ok(rounds)
}

/// Among all scm materials that current revisions disagree on, the earliest
/// observation. Ties on timestamp fall back to revision order, then
/// fingerprint, then the observing stage.
fn earliest_disagreement(dependencies: &[DependencyNode]) -> Option<FaninScmMaterial> {
    let mut observations: HashMap<&Fingerprint, Vec<(&FaninScmMaterial, &DependencyNode)>> =
        HashMap::new();
    for dependency in dependencies {
        for material in dependency.current_materials().into_iter().flatten() {
            observations
                .entry(&material.fingerprint)
                .or_default()
                .push((material, dependency));
        }
    }

    observations
        .into_values()
        .filter(|seen| seen.windows(2).any(|w| !w[0].0.same_revision(w[1].0)))
        .flatten()
        .min_by(|(a, a_node), (b, b_node)| {
            a.revision
                .modified_at
                .cmp(&b.revision.modified_at)
                .then_with(|| a.revision_cmp(b))
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
                .then_with(|| a_node.current_revision().cmp(&b_node.current_revision()))
        })
        .map(|(material, _)| material.clone())
}

fn previous_latest(previous: Option<&MaterialRevisions>, fingerprint: &Fingerprint) -> Option<Modification> {
    previous
        .and_then(|p| p.find(fingerprint))
        .and_then(MaterialRevision::latest_modification)
        .cloned()
}

fn caller_material(actual: &MaterialRevisions, fingerprint: &Fingerprint, configured: &MaterialConfig) -> MaterialConfig {
    actual
        .find(fingerprint)
        .map(|r| r.material.clone())
        .unwrap_or_else(|| configured.clone())
}

fn is_changed(previous: Option<&Modification>, modifications: &[Modification]) -> bool {
    match (previous, modifications.first()) {
        (Some(prev), Some(latest)) => prev.revision != latest.revision,
        _ => true,
    }
}

/// Modifications for an scm material declared directly by the root.
fn scm_revision(
    material: &MaterialConfig,
    dependencies: &[DependencyNode],
    actual: &MaterialRevisions,
    previous: Option<&MaterialRevisions>,
    services: ResolutionServices<'_>,
) -> FaninResult<MaterialRevision> {
    let fingerprint = material.fingerprint();
    let previous_mod = previous_latest(previous, &fingerprint);

    let pinned: Option<ScmRevision> = dependencies.iter().find_map(|d| {
        d.current_materials()
            .and_then(|m| m.get(&fingerprint))
            .map(|m| m.revision.clone())
    });

    let modifications = match pinned {
        Some(pinned) => {
            let from = previous_mod
                .as_ref()
                .map(ScmRevision::from)
                .filter(|from| from <= &pinned);
            services
                .modifications
                .modifications_between(&fingerprint, from.as_ref(), &pinned)?
        }
        None => {
            let mut candidates = actual
                .find(&fingerprint)
                .map(|r| r.modifications.clone())
                .unwrap_or_default();
            if candidates.is_empty() {
                candidates = services.modifications.latest_modifications(&fingerprint)?;
            }
            match &previous_mod {
                Some(prev) => {
                    let newest = candidates.first().cloned();
                    let narrowed: Vec<Modification> =
                        candidates.into_iter().filter(|m| m.id >= prev.id).collect();
                    if narrowed.is_empty() {
                        newest.into_iter().collect()
                    } else {
                        narrowed
                    }
                }
                None => candidates,
            }
        }
    };

    if modifications.is_empty() {
        return Err(FaninError::NoModificationsPresentForMaterial {
            material: material.display_name(),
        });
    }
    let changed = is_changed(previous_mod.as_ref(), &modifications);
    Ok(MaterialRevision::new(caller_material(actual, &fingerprint, material), modifications).changed(changed))
}

/// Modifications recorded for the stage a direct dependency resolved to.
fn dependency_revision(
    dependency: &mut DependencyNode,
    ctx: &GraphContext<'_>,
    actual: &MaterialRevisions,
    previous: Option<&MaterialRevisions>,
    services: ResolutionServices<'_>,
) -> FaninResult<MaterialRevision> {
    let stage = dependency
        .resolve()
        .cloned()
        .ok_or_else(|| FaninError::NoCompatibleUpstreamRevisions {
            pipeline: ctx.pipeline.to_string(),
            material: dependency.display_name(),
        })?;

    let modifications = services.modifications.modifications_for_stage(&stage)?;
    if modifications.is_empty() {
        return Err(FaninError::NoModificationsPresentForDependentMaterial {
            stage_locator: stage.stage_locator(),
        });
    }

    let fingerprint = dependency.fingerprint().clone();
    let previous_mod = previous_latest(previous, &fingerprint);
    let changed = is_changed(previous_mod.as_ref(), &modifications);
    let material = caller_material(actual, &fingerprint, dependency.material());
    Ok(MaterialRevision::new(material, modifications).changed(changed))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::config::ConfigSnapshot;
    use crate::fakes::PipelineFixture;
    use crate::material::{DependencyMaterialConfig, ScmMaterialConfig};

    fn pipeline(name: &str, materials: Vec<MaterialConfig>) -> PipelineConfig {
        PipelineConfig::new(name, vec!["s".to_string()], materials)
    }

    fn dep(name: &str) -> MaterialConfig {
        DependencyMaterialConfig::new(name, "s").into()
    }

    fn git(url: &str) -> MaterialConfig {
        ScmMaterialConfig::git(url).into()
    }

    #[test]
    fn test_diamond_shares_one_node_with_two_parents() {
        let config: ConfigSnapshot = [
            pipeline("a", vec![git("g")]),
            pipeline("b", vec![dep("a")]),
            pipeline("c", vec![dep("a")]),
            pipeline("d", vec![dep("b"), dep("c")]),
        ]
        .into_iter()
        .collect();

        let graph = FaninGraph::build(&config, "d").unwrap();
        assert_eq!(graph.node_count(), 5);

        let shared = graph.node(&dep("a").fingerprint()).unwrap();
        assert_eq!(shared.links().parents().len(), 2);
        assert_eq!(graph.root().links().children().len(), 2);

        let beneath = graph.scm_fingerprints_beneath(&dep("b").fingerprint()).unwrap();
        assert!(beneath.contains(&git("g").fingerprint()));
        assert_eq!(
            graph
                .node(&dep("c").fingerprint())
                .and_then(MaterialNode::as_dependency)
                .unwrap()
                .configured_scm()
                .len(),
            1
        );
    }

    #[test]
    fn test_unknown_upstream_fails() {
        let config: ConfigSnapshot = [pipeline("down", vec![dep("ghost")])].into_iter().collect();
        let err = FaninGraph::build(&config, "down").unwrap_err();
        assert!(matches!(err, FaninError::PipelineNotFound { pipeline } if pipeline == "ghost"));
    }

    #[test]
    fn test_unknown_root_fails() {
        let err = FaninGraph::build(&ConfigSnapshot::new(), "down").unwrap_err();
        assert!(matches!(err, FaninError::PipelineNotFound { .. }));
    }

    #[test]
    fn test_configuration_cycle_detected() {
        let config: ConfigSnapshot = [
            pipeline("a", vec![dep("c")]),
            pipeline("b", vec![dep("a")]),
            pipeline("c", vec![dep("b")]),
        ]
        .into_iter()
        .collect();

        let err = FaninGraph::build(&config, "c").unwrap_err();
        match err {
            FaninError::DependencyCycle { pipelines } => {
                assert_eq!(pipelines, vec!["c", "b", "a", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_classification_covers_transitive_materials() {
        let config: ConfigSnapshot = [
            pipeline("up", vec![git("g1"), git("g2")]),
            pipeline("down", vec![dep("up"), git("g3")]),
        ]
        .into_iter()
        .collect();

        let graph = FaninGraph::build(&config, "down").unwrap();
        let classification = graph.classification();
        assert_eq!(classification.scm_count(), 3);
        assert_eq!(classification.dependency_count(), 1);
        assert!(classification.is_dependency(&dep("up").fingerprint()));
        assert_eq!(
            graph.scm_fingerprints_beneath(graph.root().fingerprint()).unwrap().len(),
            3
        );
    }

    #[test]
    fn test_timestamp_tie_falls_back_to_revision_order() {
        let mut fx = PipelineFixture::new();
        let g = fx.git("g");
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        fx.checkin_at(&g, "g-a", at);
        fx.checkin_at(&g, "g-b", at);
        let p1 = fx.add_pipeline("p1", vec![g.clone()]);
        let p2 = fx.add_pipeline("p2", vec![g.clone()]);
        fx.run_and_pass("p1", &["g-b"]);
        fx.run_and_pass("p2", &["g-a"]);
        fx.add_pipeline("down", vec![p1.clone(), p2.clone()]);

        let graph = FaninGraph::build(&fx.config, "down").unwrap();
        let ctx = GraphContext {
            pipeline: "down",
            history: &fx.history,
            stages: &fx.history,
            classification: graph.classification(),
            max_backtrack_limit: 100,
        };
        let populated = |material: &MaterialConfig| {
            let mut node = DependencyNode::new(material.as_dependency().cloned().unwrap());
            node.set_configured_scm(BTreeSet::from([g.fingerprint()]));
            node.populate_revisions(&ctx).unwrap();
            node
        };

        let expected = fx.scm_revision(&g, "g-a");
        assert_eq!(expected.modified_at, fx.scm_revision(&g, "g-b").modified_at);
        for nodes in [
            vec![populated(&p1), populated(&p2)],
            vec![populated(&p2), populated(&p1)],
        ] {
            let target = earliest_disagreement(&nodes).unwrap();
            assert_eq!(target.fingerprint, g.fingerprint());
            assert_eq!(target.revision, expected);
        }
    }
}
