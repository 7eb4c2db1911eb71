//! Incremental extractor for the reasoning / file-record wire grammar.
//!
//! Grammar (marker pairs, no escaping, no nesting):
//!
//! ```text
//! response  := prose? reasoning? (prose | record)*
//! reasoning := "<reasoning>" text "</reasoning>"
//! record    := "<file" ws "path=" quoted ws? ">" text "</file>"
//! ```
//!
//! The extractor is an explicit state machine over a growing buffer. A scan
//! cursor marks how far the buffer has been consumed, so each delta only
//! examines new bytes plus a marker-length overlap.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::{BuildPhase, FileEdit, PhaseSignal};
use crate::stream::event::{DroppedFragment, StreamEvent};

pub const REASONING_OPEN: &str = "<reasoning>";
pub const REASONING_CLOSE: &str = "</reasoning>";
pub const FILE_OPEN: &str = "<file";
pub const FILE_CLOSE: &str = "</file>";

/// An opening file tag longer than this without `>` is not a tag.
const MAX_TAG_LEN: usize = 512;

/// Overlap kept when a marker search fails, so a marker split across deltas is still found.
const MARKER_OVERLAP: usize = REASONING_CLOSE.len() - 1;

static FILE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<file\s+path\s*=\s*(?:"([^"]*)"|'([^']*)')\s*>$"#)
        .expect("file tag regex must compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scan {
    /// No marker seen yet; everything so far is prose.
    Prose,
    /// Inside the reasoning segment.
    Reasoning { body_start: usize },
    /// Between records (reasoning finished or at least one record seen).
    Idle,
    /// Inside a file record.
    File { path: String, body_start: usize },
}

enum TagParse {
    Complete { path: String, len: usize },
    Incomplete,
    NotATag,
}

enum Opening {
    Reasoning(usize),
    File {
        at: usize,
        path: String,
        body_start: usize,
    },
    /// Looked like a file tag but wasn't; resume after it.
    Skip(usize),
    /// A file tag started at this offset but is not complete yet.
    Pending(usize),
    None,
}

/// Turns raw text deltas into [`StreamEvent`]s.
#[derive(Debug, Clone)]
pub struct StreamTagExtractor {
    buffer: String,
    cursor: usize,
    scan: Scan,
    reasoning_done: bool,
    last_partial: String,
    files_emitted: usize,
    phase: BuildPhase,
}

impl Default for StreamTagExtractor {
    fn default() -> Self {
        Self::new(BuildPhase::Thinking)
    }
}

/// Pure form of [`StreamTagExtractor::feed`].
#[must_use]
pub fn step(state: StreamTagExtractor, delta: &str) -> (StreamTagExtractor, Vec<StreamEvent>) {
    let mut state = state;
    let events = state.feed(delta);
    (state, events)
}

impl StreamTagExtractor {
    #[must_use]
    pub fn new(start: BuildPhase) -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            scan: Scan::Prose,
            reasoning_done: false,
            last_partial: String::new(),
            files_emitted: 0,
            phase: start,
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    #[must_use]
    pub fn files_emitted(&self) -> usize {
        self.files_emitted
    }

    #[must_use]
    pub fn reasoning_complete(&self) -> bool {
        self.reasoning_done
    }

    /// Append a delta and return every event it produced.
    pub fn feed(&mut self, delta: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(delta);
        let mut events = Vec::new();
        let mut signals = Vec::new();

        while self.advance_scan(&mut events, &mut signals) {}

        if let Some(partial) = self.partial_snapshot() {
            if partial != self.last_partial {
                partial.clone_into(&mut self.last_partial);
                events.push(StreamEvent::ReasoningPartial(partial));
            }
        }

        // One phase event per delta; a file record in the same delta outranks
        // a reasoning completion.
        let next = signals
            .iter()
            .fold(self.phase, |phase, signal| phase.advance(*signal));
        if next != self.phase {
            self.phase = next;
            events.push(StreamEvent::PhaseAdvance(next));
        }
        events
    }

    /// Apply an out-of-band signal such as a fallback timer.
    pub fn apply_signal(&mut self, signal: PhaseSignal) -> Option<StreamEvent> {
        let next = self.phase.advance(signal);
        if next == self.phase {
            return None;
        }
        self.phase = next;
        Some(StreamEvent::PhaseAdvance(next))
    }

    /// Report what, if anything, is discarded because the stream ended mid-structure.
    #[must_use]
    pub fn finish(&self) -> Option<DroppedFragment> {
        let dropped = match &self.scan {
            Scan::Reasoning { .. } => Some(DroppedFragment::Reasoning),
            Scan::File { path, .. } => Some(DroppedFragment::File { path: path.clone() }),
            Scan::Prose | Scan::Idle => None,
        };
        if let Some(fragment) = &dropped {
            warn!(?fragment, "stream ended inside an open structure; dropping it");
        }
        dropped
    }

    /// Run one transition. Returns `false` when more input is needed.
    fn advance_scan(&mut self, events: &mut Vec<StreamEvent>, signals: &mut Vec<PhaseSignal>) -> bool {
        match self.scan.clone() {
            Scan::Prose | Scan::Idle => {
                let allow_reasoning = self.scan == Scan::Prose;
                match self.next_opening(self.cursor, allow_reasoning) {
                    Opening::Reasoning(at) => {
                        let body_start = at + REASONING_OPEN.len();
                        self.scan = Scan::Reasoning { body_start };
                        self.cursor = body_start;
                        signals.push(PhaseSignal::ReasoningOpened);
                        true
                    }
                    Opening::File {
                        path, body_start, ..
                    } => {
                        self.enter_file(path, body_start);
                        true
                    }
                    Opening::Skip(next) => {
                        self.cursor = next;
                        true
                    }
                    Opening::Pending(at) => {
                        self.cursor = at;
                        false
                    }
                    Opening::None => {
                        self.cursor = self.resume_point();
                        false
                    }
                }
            }
            Scan::Reasoning { body_start } => {
                let close = self.buffer[self.cursor..]
                    .find(REASONING_CLOSE)
                    .map(|i| self.cursor + i);
                match (close, self.first_file_opening(self.cursor)) {
                    // A complete file tag before any close marker: the model moved
                    // on without closing the segment, so the reasoning is abandoned.
                    (
                        _,
                        Opening::File {
                            at,
                            path,
                            body_start: file_body,
                        },
                    ) if close.is_none_or(|c| at < c) => {
                        warn!(
                            reasoning_bytes = at - body_start,
                            "reasoning segment never closed; switching to file record"
                        );
                        self.reasoning_done = true;
                        self.enter_file(path, file_body);
                        true
                    }
                    (Some(close_at), _) => {
                        let text = self.buffer[body_start..close_at].trim().to_string();
                        self.scan = Scan::Idle;
                        self.cursor = close_at + REASONING_CLOSE.len();
                        self.reasoning_done = true;
                        debug!(len = text.len(), "reasoning segment complete");
                        events.push(StreamEvent::ReasoningComplete(text));
                        signals.push(PhaseSignal::ReasoningClosed);
                        true
                    }
                    (None, Opening::Pending(at)) => {
                        self.cursor = at;
                        false
                    }
                    (None, _) => {
                        self.cursor = self.resume_point();
                        false
                    }
                }
            }
            Scan::File { path, body_start } => {
                let Some(rel) = self.buffer[self.cursor..].find(FILE_CLOSE) else {
                    self.cursor = self.resume_point();
                    return false;
                };
                let close_at = self.cursor + rel;
                let content = clean_body(&self.buffer[body_start..close_at]);
                self.scan = Scan::Idle;
                self.cursor = close_at + FILE_CLOSE.len();
                if path.trim().is_empty() {
                    warn!("file record without a path; dropping it");
                    return true;
                }
                self.files_emitted += 1;
                debug!(%path, index = self.files_emitted, bytes = content.len(), "file record complete");
                events.push(StreamEvent::FileEdit(FileEdit::new(path, content)));
                signals.push(PhaseSignal::FileRecord);
                true
            }
        }
    }

    fn enter_file(&mut self, path: String, body_start: usize) {
        self.scan = Scan::File { path, body_start };
        self.cursor = body_start;
    }

    /// Like [`Self::next_opening`] for file tags only, stepping over lookalikes.
    fn first_file_opening(&self, from: usize) -> Opening {
        let mut from = from;
        loop {
            match self.next_opening(from, false) {
                Opening::Skip(next) => from = next,
                other => return other,
            }
        }
    }

    /// Find the earliest opening marker at or after `from`.
    fn next_opening(&self, from: usize, allow_reasoning: bool) -> Opening {
        let hay = &self.buffer[from..];
        let reasoning = if allow_reasoning {
            hay.find(REASONING_OPEN)
        } else {
            None
        };
        let file = hay.find(FILE_OPEN);

        match (reasoning, file) {
            (Some(r), Some(f)) if r < f => Opening::Reasoning(from + r),
            (Some(r), None) => Opening::Reasoning(from + r),
            (_, Some(f)) => {
                let at = from + f;
                match parse_file_tag(&self.buffer[at..]) {
                    TagParse::Complete { path, len } => Opening::File {
                        at,
                        path,
                        body_start: at + len,
                    },
                    TagParse::Incomplete => Opening::Pending(at),
                    TagParse::NotATag => Opening::Skip(at + FILE_OPEN.len()),
                }
            }
            (None, None) => Opening::None,
        }
    }

    /// Where the next search should start when nothing was found.
    fn resume_point(&self) -> usize {
        let mut at = self.buffer.len().saturating_sub(MARKER_OVERLAP).max(self.cursor);
        while !self.buffer.is_char_boundary(at) {
            at -= 1;
        }
        at
    }

    fn partial_snapshot(&self) -> Option<String> {
        let raw = match &self.scan {
            Scan::Prose => {
                let end = self.buffer.find(FILE_OPEN).unwrap_or(self.buffer.len());
                hold_back(&self.buffer[..end])
            }
            Scan::Reasoning { body_start } => hold_back(&self.buffer[*body_start..]),
            Scan::Idle | Scan::File { .. } => return None,
        };
        let text = raw.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

fn parse_file_tag(rest: &str) -> TagParse {
    let bytes = rest.as_bytes();
    let Some(&after) = bytes.get(FILE_OPEN.len()) else {
        return TagParse::Incomplete;
    };
    if !after.is_ascii_whitespace() {
        return TagParse::NotATag;
    }
    let window = &bytes[..bytes.len().min(MAX_TAG_LEN)];
    let Some(gt) = window.iter().position(|&b| b == b'>') else {
        return if bytes.len() >= MAX_TAG_LEN {
            TagParse::NotATag
        } else {
            TagParse::Incomplete
        };
    };
    let tag = &rest[..=gt];
    match FILE_TAG.captures(tag) {
        Some(caps) => {
            let path = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str())
                .trim()
                .to_string();
            TagParse::Complete { path, len: gt + 1 }
        }
        None => TagParse::NotATag,
    }
}

/// Drop a trailing fragment that may still grow into a marker.
fn hold_back(text: &str) -> &str {
    const MARKERS: [&str; 4] = [REASONING_OPEN, REASONING_CLOSE, FILE_OPEN, FILE_CLOSE];
    let tail_start = text.len().saturating_sub(MARKER_OVERLAP);
    for (i, c) in text.char_indices() {
        if i < tail_start || c != '<' {
            continue;
        }
        let tail = &text[i..];
        if MARKERS.iter().any(|m| m.starts_with(tail)) {
            return &text[..i];
        }
    }
    text
}

/// Strip the framing newlines and an enclosing code fence from a record body.
fn clean_body(raw: &str) -> String {
    let body = raw
        .strip_prefix("\r\n")
        .or_else(|| raw.strip_prefix('\n'))
        .unwrap_or(raw);
    let body = match body.strip_suffix('\n') {
        Some(b) => b.strip_suffix('\r').unwrap_or(b),
        None => body,
    };
    strip_fence(body).to_string()
}

fn strip_fence(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.len() < 6 || !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return body;
    }
    let Some(first_nl) = trimmed.find('\n') else {
        return body;
    };
    let inner_end = trimmed.len() - 3;
    if first_nl + 1 > inner_end {
        return body;
    }
    &trimmed[first_nl + 1..inner_end]
}
