use serde::Serialize;

use crate::models::{BuildPhase, FileEdit};

/// Typed event derived from the raw response buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Replacement snapshot of the best-known reasoning prefix.
    ReasoningPartial(String),
    /// The reasoning segment closed. Emitted at most once per turn.
    ReasoningComplete(String),
    /// A complete file record. Emitted once per record.
    FileEdit(FileEdit),
    /// The turn moved to a later build phase.
    PhaseAdvance(BuildPhase),
}

impl StreamEvent {
    /// Settled events do not depend on how the response was split into deltas.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::ReasoningComplete(_) | Self::FileEdit(_))
    }
}

/// Structure still open when the stream ended. Its data is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DroppedFragment {
    Reasoning,
    File { path: String },
}
