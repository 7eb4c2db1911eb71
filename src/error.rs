use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store not found: run `livepreview init` first")]
    StoreNotFound,

    #[error("project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("a generation turn is already in progress for project {id}")]
    TurnInProgress { id: String },

    #[error("malformed frame: {detail}")]
    Frame { detail: String },

    #[error("transport error: {detail}")]
    Transport { detail: String },

    #[error("completion service error: {message}")]
    Completion { message: String },

    #[error("sandbox error: {detail}")]
    Sandbox { detail: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl PreviewError {
    /// Whether the failure happened while the response stream was in flight.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Http(_) | Self::Frame { .. } | Self::Completion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PreviewError>;
