/// How the supervisor should treat a failed worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient condition (network, remote service): respawn soon.
    Retryable,
    /// Nothing this run can recover from (storage unusable, bad setup):
    /// respawn after the longer fatal delay.
    Fatal,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Retryable => f.write_str("retryable"),
            FailureClass::Fatal => f.write_str("fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub class: FailureClass,
    pub reason: String,
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.class, self.reason)
    }
}

/// Value a worker task resolves to when it stops on its own.
///
/// A worker never loops across its own failures; it returns `Failed` and
/// leaves recovery to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Clean exit after a shutdown request.
    Shutdown,
    Failed(WorkerFailure),
}

impl WorkerOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        WorkerOutcome::Failed(WorkerFailure {
            class: FailureClass::Retryable,
            reason: reason.into(),
        })
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        WorkerOutcome::Failed(WorkerFailure {
            class: FailureClass::Fatal,
            reason: reason.into(),
        })
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, WorkerOutcome::Shutdown)
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            WorkerOutcome::Shutdown => None,
            WorkerOutcome::Failed(f) => Some(f.class),
        }
    }

    /// Process-style exit status: 0 for a clean shutdown, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerOutcome::Shutdown => 0,
            WorkerOutcome::Failed(_) => 1,
        }
    }
}

impl std::fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerOutcome::Shutdown => f.write_str("shutdown"),
            WorkerOutcome::Failed(failure) => failure.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(WorkerOutcome::Shutdown.exit_code(), 0);
        assert_eq!(WorkerOutcome::retryable("x").exit_code(), 1);
        assert_eq!(WorkerOutcome::fatal("x").exit_code(), 1);
    }

    #[test]
    fn display_carries_class() {
        let o = WorkerOutcome::fatal("disk full");
        assert_eq!(o.to_string(), "fatal failure: disk full");
        assert_eq!(o.failure_class(), Some(FailureClass::Fatal));
        assert!(WorkerOutcome::Shutdown.failure_class().is_none());
    }
}
