use std::time::Duration;

use tracing::debug;

use crate::config::PhaseSettings;
use crate::models::{BuildPhase, FileEdit, PhaseSignal};
use crate::stream::{DroppedFragment, StreamEvent, StreamTagExtractor};

/// One prompt/response cycle.
///
/// Owns the extractor (and with it the raw buffer and the build phase) and
/// collects the settled results. Nothing here is persisted directly.
#[derive(Debug, Clone)]
pub struct GenerationTurn {
    extractor: StreamTagExtractor,
    reasoning: Option<String>,
    streamed: Vec<FileEdit>,
    payload: Vec<FileEdit>,
    credits: u64,
    follow_up: bool,
}

/// What a finished turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutput {
    pub reasoning: Option<String>,
    /// Streamed records followed by final payload records, in that order.
    pub records: Vec<FileEdit>,
    pub credits: u64,
    pub phase: BuildPhase,
    pub dropped: Option<DroppedFragment>,
}

impl GenerationTurn {
    /// Start a turn. Follow-up turns (a preview already exists) begin at `coding`.
    #[must_use]
    pub fn new(follow_up: bool) -> Self {
        Self {
            extractor: StreamTagExtractor::new(BuildPhase::initial(follow_up)),
            reasoning: None,
            streamed: Vec::new(),
            payload: Vec::new(),
            credits: 0,
            follow_up,
        }
    }

    #[must_use]
    pub fn phase(&self) -> BuildPhase {
        self.extractor.phase()
    }

    #[must_use]
    pub fn is_follow_up(&self) -> bool {
        self.follow_up
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        self.extractor.buffer()
    }

    #[must_use]
    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    #[must_use]
    pub fn streamed(&self) -> &[FileEdit] {
        &self.streamed
    }

    /// Feed one text delta and keep the settled results.
    pub fn apply_delta(&mut self, delta: &str) -> Vec<StreamEvent> {
        let events = self.extractor.feed(delta);
        for event in &events {
            match event {
                StreamEvent::ReasoningComplete(text) => self.reasoning = Some(text.clone()),
                StreamEvent::FileEdit(edit) => self.streamed.push(edit.clone()),
                StreamEvent::ReasoningPartial(_) | StreamEvent::PhaseAdvance(_) => {}
            }
        }
        events
    }

    /// Fire whichever fallback timers are due `elapsed` after the turn started.
    pub fn tick(&mut self, elapsed: Duration, phases: &PhaseSettings) -> Option<StreamEvent> {
        let mut fired = None;
        if elapsed >= phases.thinking_timeout() {
            fired = self.extractor.apply_signal(PhaseSignal::ThinkingTimeout).or(fired);
        }
        if elapsed >= phases.planning_timeout() {
            fired = self.extractor.apply_signal(PhaseSignal::PlanningTimeout).or(fired);
        }
        if let Some(event) = &fired {
            debug!(?elapsed, ?event, "fallback phase timer fired");
        }
        fired
    }

    /// Record the final payload. Payload records count as file records for the phase.
    pub fn apply_final(&mut self, files: Vec<FileEdit>, credits: u64) -> Option<StreamEvent> {
        self.credits = credits;
        let event = if files.iter().any(|f| !f.path.trim().is_empty()) {
            self.extractor.apply_signal(PhaseSignal::FileRecord)
        } else {
            None
        };
        self.payload.extend(files.into_iter().filter(|f| !f.path.trim().is_empty()));
        event
    }

    /// Close the turn, discarding anything still open in the buffer.
    #[must_use]
    pub fn finish(self) -> TurnOutput {
        let dropped = self.extractor.finish();
        let phase = self.extractor.phase();
        let mut records = self.streamed;
        records.extend(self.payload);
        TurnOutput {
            reasoning: self.reasoning,
            records,
            credits: self.credits,
            phase,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases() -> PhaseSettings {
        PhaseSettings::default()
    }

    #[test]
    fn collects_reasoning_and_records() {
        let mut turn = GenerationTurn::new(false);
        turn.apply_delta("<reasoning>Add a header</reasoning>\n<file path=\"src/App.tsx\">\n");
        turn.apply_delta("export default function App() { return <h1>Hello</h1>; }\n</file>");
        assert_eq!(turn.reasoning(), Some("Add a header"));
        assert_eq!(turn.streamed().len(), 1);
        assert_eq!(turn.phase(), BuildPhase::Done);

        let out = turn.finish();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped, None);
    }

    #[test]
    fn follow_up_starts_at_coding() {
        let turn = GenerationTurn::new(true);
        assert!(turn.is_follow_up());
        assert_eq!(turn.phase(), BuildPhase::Coding);
    }

    #[test]
    fn timers_fire_in_order_and_stop_at_coding() {
        let mut turn = GenerationTurn::new(false);
        assert_eq!(turn.tick(Duration::from_secs(1), &phases()), None);
        assert_eq!(
            turn.tick(Duration::from_secs(3), &phases()),
            Some(StreamEvent::PhaseAdvance(BuildPhase::Planning))
        );
        assert_eq!(turn.tick(Duration::from_secs(4), &phases()), None);
        assert_eq!(
            turn.tick(Duration::from_secs(8), &phases()),
            Some(StreamEvent::PhaseAdvance(BuildPhase::Coding))
        );
        assert_eq!(turn.tick(Duration::from_secs(60), &phases()), None);
        assert_eq!(turn.phase(), BuildPhase::Coding);
    }

    #[test]
    fn late_first_tick_jumps_straight_to_coding() {
        let mut turn = GenerationTurn::new(false);
        assert_eq!(
            turn.tick(Duration::from_secs(9), &phases()),
            Some(StreamEvent::PhaseAdvance(BuildPhase::Coding))
        );
    }

    #[test]
    fn payload_records_follow_streamed_ones() {
        let mut turn = GenerationTurn::new(false);
        turn.apply_delta("<file path=\"a.tsx\">one</file>");
        turn.apply_final(
            vec![FileEdit::new("a.tsx", "two"), FileEdit::new("", "ignored")],
            12,
        );
        let out = turn.finish();
        assert_eq!(out.credits, 12);
        assert_eq!(
            out.records,
            vec![FileEdit::new("a.tsx", "one"), FileEdit::new("a.tsx", "two")]
        );
    }

    #[test]
    fn payload_only_turn_reaches_done() {
        let mut turn = GenerationTurn::new(false);
        let event = turn.apply_final(vec![FileEdit::new("src/App.tsx", "x")], 1);
        assert_eq!(event, Some(StreamEvent::PhaseAdvance(BuildPhase::Done)));
    }

    #[test]
    fn unterminated_record_is_reported_dropped() {
        let mut turn = GenerationTurn::new(false);
        turn.apply_delta("<file path=\"src/App.tsx\">partial");
        let out = turn.finish();
        assert!(out.records.is_empty());
        assert_eq!(
            out.dropped,
            Some(DroppedFragment::File {
                path: "src/App.tsx".into()
            })
        );
    }
}
