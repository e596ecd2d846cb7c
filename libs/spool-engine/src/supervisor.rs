use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use spool_api::{FailureClass, WorkerKind, WorkerOutcome};

use crate::config::SpoolConfig;
use crate::log_sink::LogSinks;
use crate::worker::{WorkerChannels, WorkerContext};

pub type WorkerFuture = Pin<Box<dyn Future<Output = WorkerOutcome> + Send>>;

/// Builds one worker run. Called on the first start and on every restart.
pub type WorkerFactory = Box<dyn Fn(WorkerContext) -> WorkerFuture + Send + Sync>;

/// Box an async closure as a [`WorkerFactory`].
pub fn worker_factory<F, Fut>(f: F) -> WorkerFactory
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkerOutcome> + Send + 'static,
{
    Box::new(move |ctx| -> WorkerFuture { Box::pin(f(ctx)) })
}

pub struct Workers {
    pub grabber: WorkerFactory,
    pub uploader: WorkerFactory,
}

/// Lifecycle of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Starting,
    Running,
    /// Heartbeats stopped; the task was aborted and is winding down.
    Unresponsive,
    /// The task ended on its own.
    Terminated,
    /// Waiting for the respawn delay.
    Restarting,
}

struct WorkerSlot {
    kind: WorkerKind,
    factory: WorkerFactory,
    state: SlotState,
    handle: Option<JoinHandle<WorkerOutcome>>,
    channels: Option<WorkerChannels>,
    restart_at: Option<Instant>,
    last_beat: Instant,
    /// Set while an aborted task has not yet finished.
    aborted_at: Option<Instant>,
    restarts: u32,
}

impl WorkerSlot {
    fn new(kind: WorkerKind, factory: WorkerFactory, now: Instant) -> Self {
        Self {
            kind,
            factory,
            state: SlotState::Starting,
            handle: None,
            channels: None,
            restart_at: Some(now),
            last_beat: now,
            aborted_at: None,
            restarts: 0,
        }
    }

    fn watched(&self) -> bool {
        self.kind == WorkerKind::Grabber
    }
}

// ═══════════════════════════════════════════════════════════════
//  Supervisor
// ═══════════════════════════════════════════════════════════════

/// Owns both workers: spawns them, watches them, restarts them and writes
/// their log events to the sinks.
///
/// Poll loop, every `poll_interval`:
///
/// 1. drain log events of both workers into the sinks;
/// 2. collect the uploader's outcome if its task ended;
/// 3. collect the grabber's outcome if its task ended;
/// 4. drain grabber heartbeats, abort the grabber if they went stale;
/// 5. start every slot whose respawn time has come.
///
/// An aborted grabber is replaced only once its task has finished, so two
/// grabbers never run at the same time even if the old one was stuck in a
/// blocking call when the abort came.
///
/// Worker failures never reach the caller. [`run`](Self::run) returns only
/// once the shutdown token is cancelled and the workers are stopped.
pub struct Supervisor {
    config: Arc<SpoolConfig>,
    sinks: LogSinks,
    grabber: WorkerSlot,
    uploader: WorkerSlot,
}

impl Supervisor {
    pub fn new(workers: Workers, config: Arc<SpoolConfig>, sinks: LogSinks) -> Self {
        let now = Instant::now();
        Self {
            config,
            sinks,
            grabber: WorkerSlot::new(WorkerKind::Grabber, workers.grabber, now),
            uploader: WorkerSlot::new(WorkerKind::Uploader, workers.uploader, now),
        }
    }

    pub fn state(&self, kind: WorkerKind) -> SlotState {
        self.slot(kind).state
    }

    /// How many times the worker was started again after its first run.
    pub fn restarts(&self, kind: WorkerKind) -> u32 {
        self.slot(kind).restarts
    }

    fn slot(&self, kind: WorkerKind) -> &WorkerSlot {
        match kind {
            WorkerKind::Grabber => &self.grabber,
            WorkerKind::Uploader => &self.uploader,
        }
    }

    fn slot_mut(&mut self, kind: WorkerKind) -> &mut WorkerSlot {
        match kind {
            WorkerKind::Grabber => &mut self.grabber,
            WorkerKind::Uploader => &mut self.uploader,
        }
    }

    pub async fn run(&mut self, shutdown: CancellationToken) {
        tracing::info!(
            poll = ?self.config.supervisor.poll_interval(),
            heartbeat_timeout = ?self.config.supervisor.heartbeat_timeout(),
            "supervisor started"
        );

        loop {
            self.tick(Instant::now(), &shutdown).await;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.supervisor.poll_interval()) => {}
            }
        }

        self.stop().await;
        tracing::info!("supervisor stopped");
    }

    /// One pass of the poll loop.
    async fn tick(&mut self, now: Instant, shutdown: &CancellationToken) {
        self.drain_logs(WorkerKind::Grabber);
        self.drain_logs(WorkerKind::Uploader);

        self.collect_exit(WorkerKind::Uploader, now).await;
        self.collect_exit(WorkerKind::Grabber, now).await;

        self.drain_heartbeats(now);
        self.check_heartbeat(now);

        self.start_due(WorkerKind::Grabber, now, shutdown);
        self.start_due(WorkerKind::Uploader, now, shutdown);
    }

    // ── Logs ──

    fn drain_logs(&mut self, kind: WorkerKind) {
        let Some(channels) = self.slot_mut(kind).channels.as_mut() else {
            return;
        };
        let mut events = Vec::new();
        while let Ok(event) = channels.log.try_recv() {
            events.push(event);
        }
        for event in &events {
            if let Err(e) = self.sinks.append(event) {
                tracing::error!(worker = %event.source, error = %e, "log sink write failed");
            }
        }
    }

    // ── Liveness ──

    async fn collect_exit(&mut self, kind: WorkerKind, now: Instant) {
        let slot = self.slot_mut(kind);
        if !slot.handle.as_ref().is_some_and(|h| h.is_finished()) {
            return;
        }
        let Some(handle) = slot.handle.take() else {
            return;
        };

        if slot.state == SlotState::Unresponsive {
            let result = handle.await;
            tracing::info!(
                worker = %kind,
                cancelled = result.as_ref().is_err_and(|e| e.is_cancelled()),
                "aborted worker stopped"
            );
            slot.aborted_at = None;
            slot.restart_at = Some(now);
            return;
        }

        let delay = match handle.await {
            Ok(WorkerOutcome::Failed(failure)) if failure.class == FailureClass::Fatal => {
                tracing::error!(worker = %kind, reason = %failure.reason, "worker failed");
                self.config.supervisor.fatal_respawn_delay()
            }
            Ok(outcome) => {
                if outcome.is_shutdown() {
                    tracing::info!(worker = %kind, "worker exited on its own");
                } else {
                    tracing::warn!(worker = %kind, code = outcome.exit_code(), %outcome, "worker exited");
                }
                self.config.supervisor.respawn_delay()
            }
            Err(e) => {
                tracing::error!(worker = %kind, error = %e, "worker task died");
                self.config.supervisor.respawn_delay()
            }
        };

        let slot = self.slot_mut(kind);
        slot.state = SlotState::Terminated;
        slot.restart_at = Some(now + delay);
    }

    fn drain_heartbeats(&mut self, now: Instant) {
        let slot = &mut self.grabber;
        let Some(rx) = slot.channels.as_mut().and_then(|c| c.heartbeat.as_mut()) else {
            return;
        };
        let mut beats = 0usize;
        while rx.try_recv().is_ok() {
            beats += 1;
        }
        if beats > 0 {
            // a pending restart grace stays in force
            slot.last_beat = slot.last_beat.max(now);
        }
    }

    fn check_heartbeat(&mut self, now: Instant) {
        let timeout = self.config.supervisor.heartbeat_timeout();
        let grace = self.config.supervisor.shutdown_grace();
        let slot = &mut self.grabber;
        if slot.state == SlotState::Unresponsive {
            if let Some(since) = slot.aborted_at.take_if(|since| now.saturating_duration_since(*since) > grace) {
                tracing::error!(
                    worker = %slot.kind,
                    busy = ?now.saturating_duration_since(since),
                    "aborted worker is still busy, respawn held back"
                );
            }
            return;
        }
        if slot.state != SlotState::Running {
            return;
        }
        let silent = now.saturating_duration_since(slot.last_beat);
        if silent <= timeout {
            return;
        }

        tracing::warn!(worker = %slot.kind, silent = ?silent, "no heartbeat, aborting worker");
        // the handle stays in the slot until the task is really gone
        if let Some(handle) = slot.handle.as_ref() {
            handle.abort();
        }
        slot.state = SlotState::Unresponsive;
        slot.aborted_at = Some(now);
    }

    // ── Spawning ──

    fn start_due(&mut self, kind: WorkerKind, now: Instant, shutdown: &CancellationToken) {
        let Some(at) = self.slot(kind).restart_at else {
            return;
        };
        if self.slot(kind).handle.is_some() {
            return;
        }
        if now < at {
            self.slot_mut(kind).state = match self.slot(kind).state {
                SlotState::Starting => SlotState::Starting,
                _ => SlotState::Restarting,
            };
            return;
        }

        // events from the previous run go out before its channel is replaced
        self.drain_logs(kind);

        let grace = self.config.supervisor.restart_grace();
        let slot = self.slot_mut(kind);
        if slot.state != SlotState::Starting {
            slot.restarts += 1;
            tracing::info!(worker = %kind, restarts = slot.restarts, "restarting worker");
        } else {
            tracing::info!(worker = %kind, "starting worker");
        }

        let (ctx, channels) = WorkerContext::channel(kind, slot.watched(), shutdown.child_token());
        slot.handle = Some(tokio::spawn((slot.factory)(ctx)));
        slot.channels = Some(channels);
        slot.restart_at = None;
        if slot.watched() {
            slot.last_beat = now + grace;
        }
        slot.state = SlotState::Running;
    }

    // ── Shutdown ──

    async fn stop(&mut self) {
        let deadline = Instant::now() + self.config.supervisor.shutdown_grace();

        for kind in [WorkerKind::Grabber, WorkerKind::Uploader] {
            let Some(mut handle) = self.slot_mut(kind).handle.take() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(outcome)) => tracing::info!(worker = %kind, %outcome, "worker stopped"),
                Ok(Err(e)) => tracing::warn!(worker = %kind, error = %e, "worker task died during shutdown"),
                Err(_) => {
                    tracing::warn!(worker = %kind, "worker ignored shutdown, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }
            self.slot_mut(kind).state = SlotState::Terminated;
        }

        self.drain_logs(WorkerKind::Grabber);
        self.drain_logs(WorkerKind::Uploader);
    }
}
