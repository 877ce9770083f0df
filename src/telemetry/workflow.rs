//! Workflow span helpers.
//!
//! Provides span creation and state-transition recording for workflows
//! moving through the coordinator.

use tracing::Span;

use crate::model::{PeerId, WorkflowId};

/// Start a span scoped to one workflow on one peer.
///
/// The `workflow.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_workflow_span(workflow_id: &WorkflowId, peer: &PeerId) -> Span {
    tracing::info_span!(
        "workflow",
        "workflow.id" = %workflow_id,
        "peer.id" = %peer,
        "workflow.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
///
/// Emits a tracing `info` event scoped to the span and fills in
/// `workflow.status`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("workflow.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
