//! JSON snapshot of configuration, history and trigger requests.
//!
//! A snapshot is what a CD server would export for offline resolution:
//! pipeline configs, scm modifications, recorded pipeline instances with
//! their passed stages, and the triggers to resolve.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use fanin_core::fakes::{InMemoryHistory, InMemoryModifications};
use fanin_core::{
    ConfigSnapshot, MaterialConfig, MaterialRevisions, Modification, PipelineConfig,
    PipelineTimelineEntry, ResolutionServices, StageIdentifier,
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub checkins: Vec<Checkin>,
    #[serde(default)]
    pub instances: Vec<RecordedInstance>,
    #[serde(default)]
    pub requests: Vec<TriggerRequest>,
}

/// Modifications of one scm material.
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkin {
    pub material: MaterialConfig,
    pub modifications: Vec<Modification>,
}

/// A pipeline instance and the stages that passed in it.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordedInstance {
    #[serde(flatten)]
    pub entry: PipelineTimelineEntry,
    #[serde(default)]
    pub passed: Vec<PassedStage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PassedStage {
    pub stage: StageIdentifier,
    /// Modifications a downstream dependency on this stage run resolves to.
    #[serde(default)]
    pub modifications: Vec<Modification>,
}

/// One trigger to resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub pipeline: String,
    pub actual: MaterialRevisions,
    #[serde(default)]
    pub previous: Option<MaterialRevisions>,
}

/// Configuration and history loaded from a snapshot, shared read-only by
/// resolution workers.
#[derive(Debug, Default)]
pub struct World {
    pub config: ConfigSnapshot,
    pub history: InMemoryHistory,
    pub modifications: InMemoryModifications,
}

impl World {
    pub fn services(&self) -> ResolutionServices<'_> {
        ResolutionServices::new(&self.history, &self.history, &self.modifications)
    }
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }

    /// Split into the shared world and the trigger requests.
    pub fn into_parts(self) -> (World, Vec<TriggerRequest>) {
        let mut world = World {
            config: self.pipelines.into_iter().collect(),
            ..World::default()
        };

        for checkin in self.checkins {
            let fingerprint = checkin.material.fingerprint();
            let mut modifications = checkin.modifications;
            modifications.sort_by_key(|m| m.id);
            for modification in modifications {
                world.modifications.add_scm(fingerprint.clone(), modification);
            }
        }

        let mut instances = self.instances;
        instances.sort_by(|a, b| {
            a.entry
                .pipeline_name
                .cmp(&b.entry.pipeline_name)
                .then(a.entry.counter.cmp(&b.entry.counter))
        });
        for instance in instances {
            let id = instance.entry.id;
            for passed in instance.passed {
                world.history.pass_stage(id, passed.stage.clone());
                world
                    .modifications
                    .add_stage(passed.stage, passed.modifications);
            }
            world.history.record(instance.entry);
        }

        (world, self.requests)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::{TimeZone, Utc};
    use fanin_core::{
        DependencyMaterialConfig, EntryRevision, MaterialRevision, ModificationRepository,
        PipelineHistory, ScmMaterialConfig, ScmRevision,
    };

    use super::*;

    fn sample() -> Snapshot {
        let git: MaterialConfig = ScmMaterialConfig::git("git-A").into();
        let up: MaterialConfig = DependencyMaterialConfig::new("up", "s").into();
        let at = |minute: u32| Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap();
        let mods: Vec<Modification> = (1..=3)
            .map(|i| Modification::new(i as u64, format!("r{i}"), at(i)))
            .collect();

        let instances = mods
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                let counter = idx as u64 + 1;
                let stage = StageIdentifier::new("up", counter, "s", 1);
                RecordedInstance {
                    entry: PipelineTimelineEntry::new("up", counter, 100 + counter)
                        .with_revision(git.fingerprint(), EntryRevision::Scm(ScmRevision::from(m))),
                    passed: vec![PassedStage {
                        modifications: vec![Modification::new(
                            100 + counter,
                            stage.stage_locator(),
                            m.modified_at,
                        )],
                        stage,
                    }],
                }
            })
            .collect();

        let stage_mod = Modification::new(103, "up/3/s/1", at(3));
        Snapshot {
            pipelines: vec![
                PipelineConfig::new("up", vec!["s".to_string()], vec![git.clone()]),
                PipelineConfig::new("down", vec!["s".to_string()], vec![up.clone(), git.clone()]),
            ],
            checkins: vec![Checkin {
                material: git,
                modifications: mods,
            }],
            instances,
            requests: vec![TriggerRequest {
                pipeline: "down".to_string(),
                actual: [MaterialRevision::new(up, vec![stage_mod])].into_iter().collect(),
                previous: None,
            }],
        }
    }

    #[test]
    fn test_snapshot_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string_pretty(&sample()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let snapshot = Snapshot::load(file.path()).unwrap();
        assert_eq!(snapshot.pipelines.len(), 2);
        assert_eq!(snapshot.instances.len(), 3);
        assert_eq!(snapshot.requests[0].pipeline, "down");
    }

    #[test]
    fn test_into_parts_populates_history() {
        let (world, requests) = sample().into_parts();
        assert_eq!(requests.len(), 1);
        assert_eq!(world.config.len(), 2);
        assert_eq!(world.history.instance_count("up").unwrap(), 3);
        let latest = world.history.instance_for("up", 0).unwrap().unwrap();
        assert_eq!(latest.counter, 3);

        let stage = StageIdentifier::new("up", 3, "s", 1);
        let mods = world.modifications.modifications_for_stage(&stage).unwrap();
        assert_eq!(mods[0].revision, "up/3/s/1");
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Snapshot::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read snapshot"));
    }
}
