use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use spool_api::{LogEvent, LogKind};

use crate::error::EngineError;

pub const ERROR_LOG: &str = "error.log";
pub const ACTIVITY_LOG: &str = "upload.log";

/// The two append-only log files fed by the supervisor.
#[derive(Debug, Clone)]
pub struct LogSinks {
    error_path: PathBuf,
    activity_path: PathBuf,
}

impl LogSinks {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            error_path: dir.join(ERROR_LOG),
            activity_path: dir.join(ACTIVITY_LOG),
        }
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    pub fn activity_path(&self) -> &Path {
        &self.activity_path
    }

    /// Create the log directory.
    pub fn ensure(&self) -> Result<(), EngineError> {
        if let Some(dir) = self.error_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| EngineError::storage(format!("mkdir {}", dir.display()), e))?;
        }
        Ok(())
    }

    pub fn append(&self, event: &LogEvent) -> Result<(), EngineError> {
        self.append_at(event, spool_api::unix_now_secs_f64())
    }

    pub fn append_at(&self, event: &LogEvent, unix_ts: f64) -> Result<(), EngineError> {
        let path = match event.kind {
            LogKind::Error => &self.error_path,
            LogKind::Log => &self.activity_path,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::storage(format!("open {}", path.display()), e))?;
        let mut line = event.format_line(unix_ts);
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|e| EngineError::storage(format!("append {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_api::WorkerKind;

    #[test]
    fn routes_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = LogSinks::new(dir.path().join("logs"));
        sinks.ensure().unwrap();

        sinks.append_at(&LogEvent::log(WorkerKind::Uploader, "201 {\"id\":7}"), 1700000000.5).unwrap();
        sinks.append_at(&LogEvent::error(WorkerKind::Grabber, "Connection failure"), 1700000001.0).unwrap();
        sinks.append_at(&LogEvent::error(WorkerKind::Uploader, "400 bad"), 1700000002.0).unwrap();

        let activity = std::fs::read_to_string(sinks.activity_path()).unwrap();
        assert_eq!(activity, "1700000000.500 uploader 201 {\"id\":7}\n");

        let errors = std::fs::read_to_string(sinks.error_path()).unwrap();
        let lines: Vec<_> = errors.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1700000001.000 grabber Connection failure",
                "1700000002.000 uploader 400 bad",
            ]
        );
    }
}
