//! Structured observability hooks for fan-in resolution.
//!
//! This module provides:
//! - A resolution-scoped tracing span via the `ResolutionSpan` RAII guard
//! - Emission functions for key events: start, window fill, drift cutoff,
//!   reconciliation pins, finish and failure
//!
//! Lifecycle events are emitted at `info!`, per-node detail at `debug!`.

use tracing::{debug, info, warn};

use crate::revision::{FaninScmMaterial, StageIdentifier};

/// RAII guard that enters a resolution-scoped span for one trigger.
///
/// # Example
///
/// ```ignore
/// let _span = ResolutionSpan::enter("down");
/// // every event below is tagged with pipeline = "down"
/// ```
pub struct ResolutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ResolutionSpan {
    pub fn enter(pipeline: &str) -> Self {
        let span = tracing::info_span!("fanin.resolve", pipeline = %pipeline);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_resolution_started(pipeline: &str, direct_dependencies: usize) {
    info!(
        event = "resolution.started",
        pipeline = %pipeline,
        direct_dependencies = direct_dependencies,
    );
}

pub fn emit_resolution_bypassed(pipeline: &str, reason: &str) {
    info!(event = "resolution.bypassed", pipeline = %pipeline, reason = %reason);
}

/// Emit event: resolution finished with the number of resolved materials and
/// reconciliation rounds.
pub fn emit_resolution_finished(pipeline: &str, materials: usize, rounds: usize) {
    info!(
        event = "resolution.finished",
        pipeline = %pipeline,
        materials = materials,
        rounds = rounds,
    );
}

pub fn emit_resolution_failed(pipeline: &str, error: &dyn std::fmt::Display) {
    warn!(event = "resolution.failed", pipeline = %pipeline, error = %error);
}

/// Emit event: a node scanned one batch of upstream history.
pub fn emit_window_filled(material: &str, scanned: usize, ceiling: usize, usable: usize) {
    debug!(
        event = "node.window_filled",
        material = %material,
        scanned = scanned,
        ceiling = ceiling,
        usable = usable,
    );
}

pub fn emit_inconsistent_instance_skipped(material: &str, stage: &StageIdentifier) {
    debug!(
        event = "node.instance_skipped",
        material = %material,
        stage = %stage,
        reason = "inconsistent scm revisions",
    );
}

/// Emit event: configuration drift lowered a node's instance ceiling.
pub fn emit_config_drift(material: &str, stage: &StageIdentifier, ceiling: usize) {
    info!(
        event = "node.config_drift",
        material = %material,
        stage = %stage,
        ceiling = ceiling,
    );
}

/// Emit event: reconciliation pinned a shared material to one revision.
pub fn emit_revision_pinned(round: usize, target: &FaninScmMaterial) {
    debug!(
        event = "graph.revision_pinned",
        round = round,
        fingerprint = %target.fingerprint.short(),
        revision = %target.revision.revision,
    );
}

pub fn emit_node_revision_altered(material: &str, from: &StageIdentifier, to: &StageIdentifier) {
    debug!(
        event = "node.revision_altered",
        material = %material,
        from = %from,
        to = %to,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_span_create() {
        let _span = ResolutionSpan::enter("down");
    }
}
