//! Read-only context handed to nodes during resolution.

use std::collections::HashSet;

use crate::material::Fingerprint;
use crate::services::{PassedStageLookup, PipelineHistory};

/// Which fingerprints the graph knows as scm materials and which as
/// dependencies. Revisions of anything else are ignored when walking history.
#[derive(Debug, Clone, Default)]
pub struct FingerprintClassification {
    scm: HashSet<Fingerprint>,
    dependency: HashSet<Fingerprint>,
}

impl FingerprintClassification {
    pub fn add_scm(&mut self, fingerprint: Fingerprint) {
        self.scm.insert(fingerprint);
    }

    pub fn add_dependency(&mut self, fingerprint: Fingerprint) {
        self.dependency.insert(fingerprint);
    }

    pub fn is_scm(&self, fingerprint: &Fingerprint) -> bool {
        self.scm.contains(fingerprint)
    }

    pub fn is_dependency(&self, fingerprint: &Fingerprint) -> bool {
        self.dependency.contains(fingerprint)
    }

    pub fn scm_count(&self) -> usize {
        self.scm.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependency.len()
    }
}

/// Immutable bundle of collaborators for one resolution.
#[derive(Clone, Copy)]
pub struct GraphContext<'a> {
    /// Pipeline being resolved; used in diagnostics.
    pub pipeline: &'a str,
    pub history: &'a dyn PipelineHistory,
    pub stages: &'a dyn PassedStageLookup,
    pub classification: &'a FingerprintClassification,
    pub max_backtrack_limit: usize,
}
