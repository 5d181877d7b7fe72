//! Revisions: stage runs, scm revisions, modifications and revision sets.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FaninError;
use crate::material::{Fingerprint, MaterialConfig};

/// One completed run of a pipeline stage.
///
/// Field order gives the total order: pipeline, pipeline counter, stage,
/// stage counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageIdentifier {
    pub pipeline_name: String,
    pub pipeline_counter: u64,
    pub stage_name: String,
    pub stage_counter: u64,
}

impl StageIdentifier {
    pub fn new(
        pipeline_name: impl Into<String>,
        pipeline_counter: u64,
        stage_name: impl Into<String>,
        stage_counter: u64,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pipeline_counter,
            stage_name: stage_name.into(),
            stage_counter,
        }
    }

    /// `pipeline/counter/stage/stage_counter`
    pub fn stage_locator(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.pipeline_name, self.pipeline_counter, self.stage_name, self.stage_counter
        )
    }
}

impl FromStr for StageIdentifier {
    type Err = FaninError;

    fn from_str(locator: &str) -> Result<Self, Self::Err> {
        let invalid = || FaninError::InvalidStageLocator {
            locator: locator.to_string(),
        };
        let parts: Vec<&str> = locator.split('/').collect();
        let [pipeline, counter, stage, stage_counter] = parts.as_slice() else {
            return Err(invalid());
        };
        if pipeline.is_empty() || stage.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(
            *pipeline,
            counter.parse().map_err(|_| invalid())?,
            *stage,
            stage_counter.parse().map_err(|_| invalid())?,
        ))
    }
}

impl std::fmt::Display for StageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stage_locator())
    }
}

/// A concrete scm revision as recorded in pipeline history.
///
/// `id` is the material's native sequence (the modification id); ordering
/// compares it first and uses the timestamp as tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScmRevision {
    pub revision: String,
    pub modified_at: DateTime<Utc>,
    pub id: u64,
}

impl ScmRevision {
    pub fn new(revision: impl Into<String>, modified_at: DateTime<Utc>, id: u64) -> Self {
        Self {
            revision: revision.into(),
            modified_at,
            id,
        }
    }
}

impl Ord for ScmRevision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.modified_at.cmp(&other.modified_at))
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for ScmRevision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&Modification> for ScmRevision {
    fn from(modification: &Modification) -> Self {
        Self {
            revision: modification.revision.clone(),
            modified_at: modification.modified_at,
            id: modification.id,
        }
    }
}

/// An scm fingerprint paired with the revision one pipeline instance used.
///
/// Equality and hashing only look at the fingerprint so that sets of these
/// match materials across instances; `Borrow<Fingerprint>` allows lookups by
/// fingerprint alone. Revisions are compared with [`FaninScmMaterial::revision_cmp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaninScmMaterial {
    pub fingerprint: Fingerprint,
    pub revision: ScmRevision,
}

impl FaninScmMaterial {
    pub fn new(fingerprint: Fingerprint, revision: ScmRevision) -> Self {
        Self {
            fingerprint,
            revision,
        }
    }

    pub fn revision_cmp(&self, other: &Self) -> Ordering {
        self.revision.cmp(&other.revision)
    }

    pub fn same_revision(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.revision == other.revision
    }
}

impl PartialEq for FaninScmMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for FaninScmMaterial {}

impl Hash for FaninScmMaterial {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl Borrow<Fingerprint> for FaninScmMaterial {
    fn borrow(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// One concrete change to a material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub id: u64,
    pub revision: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Modification {
    pub fn new(id: u64, revision: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            id,
            revision: revision.into(),
            modified_at,
            user: None,
            comment: None,
        }
    }
}

/// A material together with the modifications it resolves to.
///
/// Modifications are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRevision {
    pub material: MaterialConfig,
    pub modifications: Vec<Modification>,
    #[serde(default)]
    pub changed: bool,
}

impl MaterialRevision {
    pub fn new(material: MaterialConfig, modifications: Vec<Modification>) -> Self {
        Self {
            material,
            modifications,
            changed: false,
        }
    }

    pub fn changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.material.fingerprint()
    }

    pub fn latest_modification(&self) -> Option<&Modification> {
        self.modifications.first()
    }

    pub fn latest_revision(&self) -> Option<&str> {
        self.latest_modification().map(|m| m.revision.as_str())
    }
}

/// Ordered set of material revisions, unique by fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialRevisions {
    revisions: Vec<MaterialRevision>,
}

impl MaterialRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless a revision with the same fingerprint is already present.
    /// Returns whether the revision was added.
    pub fn push(&mut self, revision: MaterialRevision) -> bool {
        let fingerprint = revision.fingerprint();
        if self.find(&fingerprint).is_some() {
            return false;
        }
        self.revisions.push(revision);
        true
    }

    pub fn find(&self, fingerprint: &Fingerprint) -> Option<&MaterialRevision> {
        self.revisions
            .iter()
            .find(|r| &r.fingerprint() == fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.find(fingerprint).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MaterialRevision> {
        self.revisions.iter()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

impl FromIterator<MaterialRevision> for MaterialRevisions {
    fn from_iter<I: IntoIterator<Item = MaterialRevision>>(iter: I) -> Self {
        let mut revisions = MaterialRevisions::new();
        for revision in iter {
            revisions.push(revision);
        }
        revisions
    }
}

impl IntoIterator for MaterialRevisions {
    type Item = MaterialRevision;
    type IntoIter = std::vec::IntoIter<MaterialRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.into_iter()
    }
}

impl<'a> IntoIterator for &'a MaterialRevisions {
    type Item = &'a MaterialRevision;
    type IntoIter = std::slice::Iter<'a, MaterialRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.iter()
    }
}
