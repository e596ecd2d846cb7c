#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("storage ({context}): {source}")]
    Storage {
        context: String,
        source: std::io::Error,
    },
}

impl EngineError {
    /// I/O failure on the storage directory, tagged with what was being done.
    pub fn storage(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        EngineError::Storage {
            context: context.to_string(),
            source,
        }
    }

    /// Underlying I/O error kind, if any.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            EngineError::Io(e) | EngineError::Storage { source: e, .. } => Some(e.kind()),
            _ => None,
        }
    }
}
