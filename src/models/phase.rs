use serde::{Deserialize, Serialize};

/// Coarse progress indicator for one generation turn.
///
/// Variants are ordered; a turn's phase only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Thinking,
    Planning,
    Coding,
    Done,
}

/// Something observed during a turn that may move the phase forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal {
    /// The opening reasoning marker arrived.
    ReasoningOpened,
    /// The closing reasoning marker arrived.
    ReasoningClosed,
    /// A complete file record arrived.
    FileRecord,
    /// Fallback timer: the model has been "thinking" for too long.
    ThinkingTimeout,
    /// Fallback timer: the model has been "planning" for too long.
    PlanningTimeout,
}

impl PhaseSignal {
    fn target(self) -> BuildPhase {
        match self {
            Self::ReasoningOpened | Self::ThinkingTimeout => BuildPhase::Planning,
            Self::ReasoningClosed | Self::PlanningTimeout => BuildPhase::Coding,
            Self::FileRecord => BuildPhase::Done,
        }
    }
}

impl BuildPhase {
    /// Phase a turn starts in. Follow-up turns skip the cold-start phases.
    #[must_use]
    pub fn initial(follow_up: bool) -> Self {
        if follow_up {
            Self::Coding
        } else {
            Self::Thinking
        }
    }

    /// Pure transition: never regresses.
    #[must_use]
    pub fn advance(self, signal: PhaseSignal) -> Self {
        self.max(signal.target())
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
