use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::file::FileTable;

/// Author of a chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Self::User,
            _ => Self::Assistant,
        }
    }
}

/// One summarized chat entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lightweight listing row.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub credits: u64,
    pub file_count: usize,
}

/// A project as loaded from the store.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Running credit total across all turns.
    pub credits: u64,
    pub messages: Vec<ChatMessage>,
    pub files: FileTable,
}
