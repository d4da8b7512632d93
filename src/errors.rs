use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool could not be started or exited non-zero.
    #[error("{tool} failed: {detail}")]
    ToolInvocation { tool: String, detail: String },

    /// I/O failure on a pipe, temp file or archive decode.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Network failure or non-2xx answer from the storage control plane.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl AppError {
    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::ToolInvocation {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn stream(context: &str, err: impl std::fmt::Display) -> Self {
        AppError::Stream(format!("{}: {}", context, err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
