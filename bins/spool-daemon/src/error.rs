#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Engine(#[from] spool_engine::EngineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
