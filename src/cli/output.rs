use serde::Serialize;

use crate::bundle::AssemblyReport;
use crate::models::{ChatMessage, Project};
use crate::pipeline::TurnReport;
use crate::sandbox::SandboxState;

/// Format a result as minified JSON.
pub fn format_json<T: Serialize>(result: &T) -> String {
    serde_json::to_string(result).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

/// Format an error as JSON.
pub fn format_error(err: &dyn std::fmt::Display) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

/// File listing row.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct FilesOutput {
    pub id: String,
    pub files: Vec<FileEntry>,
}

impl From<&Project> for FilesOutput {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            files: project
                .files
                .iter()
                .map(|f| FileEntry {
                    path: f.path.clone(),
                    bytes: f.content.len(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryOutput<'a> {
    pub id: &'a str,
    pub credits: u64,
    pub messages: &'a [ChatMessage],
}

#[derive(Debug, Serialize)]
pub struct TurnResult<'a> {
    pub id: &'a str,
    #[serde(flatten)]
    pub report: &'a TurnReport,
}

#[derive(Debug, Serialize)]
pub struct AssembleOutput<'a> {
    pub digest: &'a str,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written: Option<&'a str>,
    #[serde(flatten)]
    pub report: &'a AssemblyReport,
}

#[derive(Debug, Serialize)]
pub struct PreviewOutput<'a> {
    #[serde(flatten)]
    pub state: &'a SandboxState,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}
