pub mod file;
pub mod phase;
pub mod project;

pub use file::{FileEdit, FileTable, ProjectFile};
pub use phase::{BuildPhase, PhaseSignal};
pub use project::{ChatMessage, Project, ProjectSummary, Role};
