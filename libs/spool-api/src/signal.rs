// ═══════════════════════════════════════════════════════════════
//  Worker → supervisor signals
// ═══════════════════════════════════════════════════════════════

/// Liveness pulse. Carries no data; receiving one means "alive as of now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat;

/// Which worker a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Stream consumer: reads the remote stream into rotated files.
    Grabber,
    /// Transporter: uploads rotated files to the sink.
    Uploader,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Grabber => "grabber",
            WorkerKind::Uploader => "uploader",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing class of a log event: `Error` goes to the error sink,
/// `Log` to the activity sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Log,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Log => "log",
            LogKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub source: WorkerKind,
    pub kind: LogKind,
    pub message: String,
}

impl LogEvent {
    pub fn log(source: WorkerKind, message: impl Into<String>) -> Self {
        Self { source, kind: LogKind::Log, message: message.into() }
    }

    pub fn error(source: WorkerKind, message: impl Into<String>) -> Self {
        Self { source, kind: LogKind::Error, message: message.into() }
    }

    /// One sink line: `<unix_timestamp> <source> <message>`.
    pub fn format_line(&self, unix_ts: f64) -> String {
        format!("{unix_ts:.3} {} {}", self.source, self.message)
    }
}
