use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{PhaseSettings, PipelineSettings};
use crate::db::ProjectStore;
use crate::error::{PreviewError, Result};
use crate::models::{BuildPhase, ChatMessage, FileEdit, FileTable, Project, ProjectFile, Role};
use crate::pipeline::aggregator::{FileSetAggregator, MergeOutcome};
use crate::pipeline::turn::{GenerationTurn, TurnOutput};
use crate::stream::{
    CompletionRequest, CompletionSource, DroppedFragment, Frame, FrameStream, ImageAttachment,
    StreamEvent,
};

/// Chat entry appended when a turn produced no file records.
pub const NO_CHANGES_MESSAGE: &str =
    "The model did not produce any file changes. Please try again.";

/// Receives progress while a turn streams.
pub trait TurnObserver {
    fn on_event(&mut self, event: &StreamEvent);
}

impl<F: FnMut(&StreamEvent)> TurnObserver for F {
    fn on_event(&mut self, event: &StreamEvent) {
        self(event);
    }
}

/// Logs progress as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TurnObserver for TracingObserver {
    fn on_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ReasoningPartial(text) => debug!(len = text.len(), "reasoning"),
            StreamEvent::ReasoningComplete(text) => info!(reasoning = %text, "reasoning complete"),
            StreamEvent::FileEdit(edit) => info!(path = %edit.path, bytes = edit.content.len(), "file record"),
            StreamEvent::PhaseAdvance(phase) => info!(%phase, "phase"),
        }
    }
}

/// User input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt: String,
    pub image: Option<ImageAttachment>,
    pub model: String,
}

impl TurnRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            model: model.into(),
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Records were merged and persisted.
    Committed {
        changed: Vec<String>,
        credits: u64,
        total_credits: u64,
    },
    /// The response finished without any file records.
    NoChanges,
    /// The stream failed before completing; nothing was applied.
    TransportFailed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    #[serde(flatten)]
    pub outcome: TurnOutcome,
    pub phase: BuildPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped: Option<DroppedFragment>,
}

impl TurnReport {
    #[must_use]
    pub fn committed(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Committed { .. })
    }
}

/// One project's generation state on top of a store.
pub struct Session<S: ProjectStore> {
    store: S,
    project: Project,
    aggregator: FileSetAggregator,
    phases: PhaseSettings,
    viewed: Option<String>,
    interrupted: bool,
}

impl<S: ProjectStore> Session<S> {
    /// Load a project. A leftover in-progress flag marks the session as interrupted.
    pub fn open(
        store: S,
        project_id: &str,
        pipeline: &PipelineSettings,
        phases: PhaseSettings,
    ) -> Result<Self> {
        let project = store.get(project_id)?;
        let interrupted = store.turn_flag(project_id)?.is_some();
        if interrupted {
            warn!(project = %project_id, "previous turn was interrupted; resubmit the prompt");
        }
        let aggregator = FileSetAggregator::new(pipeline.entry_path.as_str());
        let viewed = project
            .files
            .contains(aggregator.entry_path())
            .then(|| aggregator.entry_path().to_string());
        Ok(Self {
            store,
            project,
            aggregator,
            phases,
            viewed,
            interrupted,
        })
    }

    #[must_use]
    pub fn project(&self) -> &Project {
        &self.project
    }

    #[must_use]
    pub fn files(&self) -> &FileTable {
        &self.project.files
    }

    /// Currently viewed file.
    #[must_use]
    pub fn viewed(&self) -> Option<&str> {
        self.viewed.as_deref()
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Accept that the previous turn was lost and allow new turns.
    ///
    /// A flag younger than [`PhaseSettings::turn_stale_after`] may belong to a
    /// turn another process is still streaming; it stays and
    /// [`PreviewError::TurnInProgress`] is returned.
    pub fn acknowledge_interrupted(&mut self) -> Result<()> {
        if let Some(started) = self.store.turn_flag(&self.project.id)? {
            let age = Utc::now()
                .signed_duration_since(started)
                .to_std()
                .unwrap_or_default();
            if age < self.phases.turn_stale_after() {
                return Err(PreviewError::TurnInProgress {
                    id: self.project.id.clone(),
                });
            }
            self.store.clear_turn_flag(&self.project.id)?;
        }
        self.interrupted = false;
        Ok(())
    }

    /// Bring existing sources into the project through the aggregator.
    ///
    /// Refused while a turn is outstanding. Unchanged files are skipped and no
    /// chat entry is written when nothing changed.
    pub fn import_files(&mut self, files: &FileTable) -> Result<MergeOutcome> {
        if self.store.turn_flag(&self.project.id)?.is_some() {
            return Err(PreviewError::TurnInProgress {
                id: self.project.id.clone(),
            });
        }
        let records: Vec<FileEdit> = files
            .iter()
            .map(|f| FileEdit::new(f.path.clone(), f.content.clone()))
            .collect();
        if self.aggregator.merge(&self.project.files, &records).1.is_noop() {
            return Ok(MergeOutcome::default());
        }
        let (merge, _) = self.commit(&records, 0, None)?;
        info!(changed = merge.changed.len(), "files imported");
        Ok(merge)
    }

    /// Run one generation turn to completion.
    ///
    /// Only store failures and [`PreviewError::TurnInProgress`] are returned as
    /// errors. Stream failures end up in the report and the chat history.
    #[instrument(skip_all, fields(project = %self.project.id, model = %request.model))]
    pub async fn run_turn<C: CompletionSource>(
        &mut self,
        source: &C,
        request: TurnRequest,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnReport> {
        let id = self.project.id.clone();
        if self.store.turn_flag(&id)?.is_some() {
            return Err(PreviewError::TurnInProgress { id });
        }
        self.store.set_turn_flag(&id)?;

        let result = self.drive(source, request, observer).await;
        let cleared = self.store.clear_turn_flag(&id);
        let report = result?;
        cleared?;
        Ok(report)
    }

    async fn drive<C: CompletionSource>(
        &mut self,
        source: &C,
        request: TurnRequest,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnReport> {
        let follow_up = self.project.files.contains(self.aggregator.entry_path());
        let mut turn = GenerationTurn::new(follow_up);
        observer.on_event(&StreamEvent::PhaseAdvance(turn.phase()));

        let completion = CompletionRequest {
            files: self.project.files.clone(),
            history: self.project.messages.clone(),
            prompt: request.prompt.clone(),
            image: request.image,
            model: request.model,
        };
        let user = ChatMessage::new(Role::User, request.prompt);
        self.store.append_message(&self.project.id, &user)?;
        self.project.messages.push(user);

        info!(follow_up, files = completion.files.len(), "turn started");
        let streamed = match source.open(&completion).await {
            Ok(stream) => self.read_frames(stream, &mut turn, observer).await,
            Err(e) => Err(e),
        };
        let output = turn.finish();

        match streamed {
            Ok(()) => self.settle(output),
            Err(e) => {
                warn!(error = %e, "turn abandoned");
                let message = format!("Generation failed: {e}");
                self.push_assistant(&message)?;
                Ok(TurnReport {
                    outcome: TurnOutcome::TransportFailed { message },
                    phase: output.phase,
                    reasoning: output.reasoning,
                    dropped: output.dropped,
                })
            }
        }
    }

    /// Read until the sentinel. Idle waits are bounded by the tick so fallback
    /// timers still fire.
    async fn read_frames(
        &self,
        mut stream: FrameStream,
        turn: &mut GenerationTurn,
        observer: &mut dyn TurnObserver,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let next = tokio::time::timeout(self.phases.tick(), stream.next()).await;
            if let Some(event) = turn.tick(started.elapsed(), &self.phases) {
                observer.on_event(&event);
            }
            let frame = match next {
                Err(_) => continue,
                Ok(None) => {
                    return Err(PreviewError::Transport {
                        detail: "stream ended before the completion sentinel".into(),
                    })
                }
                Ok(Some(frame)) => frame?,
            };
            match frame {
                Frame::Delta { text } => {
                    debug!(bytes = text.len(), "delta");
                    for event in turn.apply_delta(&text) {
                        observer.on_event(&event);
                    }
                }
                Frame::Final { files, credits } => {
                    debug!(records = files.len(), credits, "final payload");
                    if let Some(event) = turn.apply_final(files, credits) {
                        observer.on_event(&event);
                    }
                }
                Frame::Error { message } => return Err(PreviewError::Completion { message }),
                Frame::Done => return Ok(()),
            }
        }
    }

    fn settle(&mut self, output: TurnOutput) -> Result<TurnReport> {
        let TurnOutput {
            reasoning,
            records,
            credits,
            phase,
            dropped,
        } = output;

        if records.is_empty() {
            info!("turn produced no file records");
            self.push_assistant(NO_CHANGES_MESSAGE)?;
            return Ok(TurnReport {
                outcome: TurnOutcome::NoChanges,
                phase,
                reasoning,
                dropped,
            });
        }

        let (merge, total_credits) = self.commit(&records, credits, reasoning.as_deref())?;
        info!(changed = merge.changed.len(), credits, total_credits, "turn committed");

        Ok(TurnReport {
            outcome: TurnOutcome::Committed {
                changed: merge.changed,
                credits,
                total_credits,
            },
            phase,
            reasoning,
            dropped,
        })
    }

    /// Merge `records` through the aggregator and persist the changed files,
    /// the credit cost and a summary entry in one store commit.
    fn commit(
        &mut self,
        records: &[FileEdit],
        credits: u64,
        reasoning: Option<&str>,
    ) -> Result<(MergeOutcome, u64)> {
        let (merged, merge) = self.aggregator.merge(&self.project.files, records);
        let changed: Vec<ProjectFile> = merge
            .changed
            .iter()
            .filter_map(|path| {
                merged.get(path).map(|content| ProjectFile {
                    path: path.clone(),
                    content: content.to_string(),
                })
            })
            .collect();
        let message = ChatMessage::new(Role::Assistant, summarize(reasoning, &merge.changed));
        let total_credits = self
            .store
            .commit_turn(&self.project.id, &changed, credits, &message)?;

        self.project.files = merged;
        self.project.credits = total_credits;
        self.project.messages.push(message);
        if let Some(viewed) = &merge.viewed {
            self.viewed = Some(viewed.clone());
        }
        Ok((merge, total_credits))
    }

    fn push_assistant(&mut self, content: &str) -> Result<()> {
        let message = ChatMessage::new(Role::Assistant, content);
        self.store.append_message(&self.project.id, &message)?;
        self.project.messages.push(message);
        Ok(())
    }
}

fn summarize(reasoning: Option<&str>, changed: &[String]) -> String {
    let files = match changed.len() {
        0 => "No files changed.".to_string(),
        1 => format!("Updated {}.", changed[0]),
        n => format!("Updated {n} files: {}.", changed.join(", ")),
    };
    match reasoning {
        Some(text) if !text.is_empty() => format!("{text}\n\n{files}"),
        _ => files,
    }
}
