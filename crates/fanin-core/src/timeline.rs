//! Pipeline timeline entries: what each historical pipeline instance ran with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::material::Fingerprint;
use crate::revision::{ScmRevision, StageIdentifier};

/// The revision an instance used for one material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryRevision {
    Scm(ScmRevision),
    /// The upstream stage run a dependency material resolved to.
    Dependency(StageIdentifier),
}

/// One historical pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTimelineEntry {
    pub pipeline_name: String,
    pub counter: u64,
    /// Storage id of the pipeline instance, used for passed-stage lookups.
    pub id: u64,
    /// Per material fingerprint, the revisions used; the first one is the
    /// revision the instance was built against.
    pub revisions: BTreeMap<Fingerprint, Vec<EntryRevision>>,
}

impl PipelineTimelineEntry {
    pub fn new(pipeline_name: impl Into<String>, counter: u64, id: u64) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            counter,
            id,
            revisions: BTreeMap::new(),
        }
    }

    pub fn with_revision(mut self, fingerprint: Fingerprint, revision: EntryRevision) -> Self {
        self.revisions.entry(fingerprint).or_default().push(revision);
        self
    }

    /// The revision this instance was built against for each material.
    pub fn primary_revisions(&self) -> impl Iterator<Item = (&Fingerprint, &EntryRevision)> {
        self.revisions
            .iter()
            .filter_map(|(fingerprint, revisions)| revisions.first().map(|r| (fingerprint, r)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::material::{DependencyMaterialConfig, MaterialConfig, ScmMaterialConfig};

    #[test]
    fn test_primary_revisions_take_first_revision() {
        let git = MaterialConfig::from(ScmMaterialConfig::git("repo")).fingerprint();
        let up = MaterialConfig::from(DependencyMaterialConfig::new("up", "s")).fingerprint();
        let at = Utc.timestamp_opt(10, 0).unwrap();
        let entry = PipelineTimelineEntry::new("down", 1, 42)
            .with_revision(git.clone(), EntryRevision::Scm(ScmRevision::new("g2", at, 2)))
            .with_revision(git.clone(), EntryRevision::Scm(ScmRevision::new("g1", at, 1)))
            .with_revision(
                up.clone(),
                EntryRevision::Dependency(StageIdentifier::new("up", 1, "s", 1)),
            );

        let primary: BTreeMap<_, _> = entry.primary_revisions().collect();
        assert_eq!(primary.len(), 2);
        match primary[&git] {
            EntryRevision::Scm(rev) => assert_eq!(rev.revision, "g2"),
            other => panic!("unexpected revision {other:?}"),
        }
        assert!(matches!(primary[&up], EntryRevision::Dependency(_)));
    }
}
