use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use spool_api::{Heartbeat, LogEvent, WorkerKind};

/// Capacity of the heartbeat channel. Beats beyond it are dropped: one
/// pending beat already tells the supervisor the worker is alive.
pub const HEARTBEAT_BUFFER: usize = 64;

/// Everything a worker gets from the supervisor: its signal channels and
/// its shutdown token.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    kind: WorkerKind,
    log: mpsc::UnboundedSender<LogEvent>,
    heartbeat: Option<mpsc::Sender<Heartbeat>>,
    shutdown: CancellationToken,
}

/// Supervisor-side ends of a worker's channels.
#[derive(Debug)]
pub struct WorkerChannels {
    pub log: mpsc::UnboundedReceiver<LogEvent>,
    pub heartbeat: Option<mpsc::Receiver<Heartbeat>>,
}

impl WorkerContext {
    /// Fresh channels for one worker run. Only workers that are watched for
    /// hangs get a heartbeat channel.
    pub fn channel(kind: WorkerKind, with_heartbeat: bool, shutdown: CancellationToken) -> (Self, WorkerChannels) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (hb_tx, hb_rx) = if with_heartbeat {
            let (tx, rx) = mpsc::channel(HEARTBEAT_BUFFER);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let ctx = Self {
            kind,
            log: log_tx,
            heartbeat: hb_tx,
            shutdown,
        };
        (ctx, WorkerChannels { log: log_rx, heartbeat: hb_rx })
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Activity event, routed to the activity sink.
    pub fn log(&self, message: impl Into<String>) {
        let event = LogEvent::log(self.kind, message);
        tracing::info!(worker = %self.kind, "{}", event.message);
        // receiver gone means the supervisor replaced this run
        let _ = self.log.send(event);
    }

    /// Error event, routed to the error sink.
    pub fn error(&self, message: impl Into<String>) {
        let event = LogEvent::error(self.kind, message);
        tracing::warn!(worker = %self.kind, "{}", event.message);
        let _ = self.log.send(event);
    }

    /// Liveness pulse. Never blocks.
    pub fn beat(&self) {
        if let Some(tx) = &self.heartbeat {
            let _ = tx.try_send(Heartbeat);
        }
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
