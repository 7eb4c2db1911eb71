pub mod aggregator;
pub mod session;
pub mod turn;

pub use aggregator::{canonical_path, FileSetAggregator, MergeOutcome};
pub use session::{
    Session, TracingObserver, TurnObserver, TurnOutcome, TurnReport, TurnRequest,
    NO_CHANGES_MESSAGE,
};
pub use turn::{GenerationTurn, TurnOutput};
