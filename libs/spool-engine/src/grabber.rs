use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use serde::de::IgnoredAny;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::io::StreamReader;

use spool_api::WorkerOutcome;

use crate::config::{AuthConfig, GrabberConfig, HttpMethod, SpoolConfig};
use crate::error::EngineError;
use crate::rotation::RotatingWriter;
use crate::supervisor::{WorkerFactory, worker_factory};
use crate::worker::WorkerContext;

/// HTTP status the stream endpoint uses to ask clients to back off.
pub const STATUS_RATE_LIMITED: u16 = 420;

/// Body of an open stream, read line by line.
pub type LineReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// What the stream endpoint answered.
pub enum StreamResponse {
    /// 200: the body is the record stream.
    Open(LineReader),
    /// 420: back off, then reconnect.
    RateLimited,
    /// Anything else.
    Rejected { status: u16, body: String },
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamResponse::Open(_) => f.write_str("Open"),
            StreamResponse::RateLimited => f.write_str("RateLimited"),
            StreamResponse::Rejected { status, body } => {
                f.debug_struct("Rejected").field("status", status).field("body", body).finish()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{0}")]
    Transport(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Opens the record stream. One call is one connection attempt.
pub trait StreamConnector: Send + Sync {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<StreamResponse, ConnectError>> + Send + '_>>;
}

// ═══════════════════════════════════════════════════════════════
//  HTTP connector
// ═══════════════════════════════════════════════════════════════

pub struct HttpStreamConnector {
    http: reqwest::Client,
    url: String,
    method: HttpMethod,
    auth: AuthConfig,
    timeout: Duration,
}

impl HttpStreamConnector {
    pub fn new(config: &GrabberConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            http,
            url: config.stream_url.clone(),
            method: config.method,
            auth: config.auth.clone(),
            timeout: config.connect_timeout(),
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let req = match self.method {
            HttpMethod::Get => self.http.get(&self.url),
            HttpMethod::Post => self.http.post(&self.url),
        };
        match &self.auth {
            AuthConfig::None => req,
            AuthConfig::Bearer { token } => req.bearer_auth(token),
            AuthConfig::Basic { username, password } => req.basic_auth(username, Some(password)),
        }
    }
}

impl StreamConnector for HttpStreamConnector {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<StreamResponse, ConnectError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = Instant::now() + self.timeout;
            let resp = tokio::time::timeout_at(deadline, self.request().send())
                .await
                .map_err(|_| ConnectError::Timeout(self.timeout))?
                .map_err(|e| ConnectError::Transport(e.to_string()))?;

            match resp.status().as_u16() {
                200 => {
                    let body = resp.bytes_stream().map_err(std::io::Error::other);
                    Ok(StreamResponse::Open(Box::pin(StreamReader::new(body))))
                }
                STATUS_RATE_LIMITED => Ok(StreamResponse::RateLimited),
                status => {
                    // a body that never ends must not outlive the attempt
                    let body = match tokio::time::timeout_at(deadline, resp.text()).await {
                        Ok(Ok(body)) => body,
                        Ok(Err(_)) | Err(_) => String::new(),
                    };
                    Ok(StreamResponse::Rejected { status, body })
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Grabber: stream → working file → completed files
// ═══════════════════════════════════════════════════════════════

/// Stream consumer.
///
/// One [`consume`](Self::consume) call is one worker run: connect (with
/// retries and rate-limit cool-downs), then read records until the stream
/// ends, the run fails or shutdown is requested. It never reconnects after
/// a read phase; the supervisor starts a new run instead.
///
/// Runs of one grabber take turns on the working file: a run starts writing
/// only after the previous run's last write has returned.
pub struct Grabber {
    connector: Arc<dyn StreamConnector>,
    config: Arc<SpoolConfig>,
    working: Arc<Mutex<()>>,
}

impl Grabber {
    pub fn new(connector: Arc<dyn StreamConnector>, config: Arc<SpoolConfig>) -> Self {
        Self {
            connector,
            config,
            working: Arc::new(Mutex::new(())),
        }
    }

    /// Grabber over HTTP, configured from `config.grabber`.
    pub fn http(config: Arc<SpoolConfig>) -> Result<Self, EngineError> {
        let connector = HttpStreamConnector::new(&config.grabber)?;
        Ok(Self::new(Arc::new(connector), config))
    }

    /// Wrap into a factory the supervisor calls for every (re)start.
    pub fn into_factory(self) -> WorkerFactory {
        let grabber = Arc::new(self);
        worker_factory(move |ctx| {
            let grabber = grabber.clone();
            async move { grabber.consume(ctx).await }
        })
    }

    pub async fn consume(&self, ctx: WorkerContext) -> WorkerOutcome {
        let cfg = &self.config.grabber;
        tracing::info!(url = %cfg.stream_url, "grabber starting");

        let Some(lease) = self.beating(&ctx, self.working.clone().lock_owned()).await else {
            ctx.log("Exiting grabber");
            return WorkerOutcome::Shutdown;
        };

        let storage = self.config.storage();
        let (flush, cut, start) = (cfg.flush_threshold_bytes, cfg.cut_size_bytes, cfg.disambiguator_start);
        let opened = tokio::task::spawn_blocking(move || RotatingWriter::open(storage, flush, cut, start)).await;
        let mut working = match opened.map_err(EngineError::from).and_then(|r| r) {
            Ok(writer) => WorkingFile::new(writer, lease),
            Err(e) => return storage_failure(&ctx, e),
        };

        let reader = match self.connect(&ctx).await {
            Ok(reader) => reader,
            Err(Stop::Shutdown) => return exit(&mut working, &ctx).await,
            Err(Stop::Failed(outcome)) => return outcome,
        };
        ctx.log("Connected to stream");

        self.read_records(reader, &mut working, &ctx).await
    }

    /// Await `fut` while beating every heartbeat interval. `None` on shutdown.
    async fn beating<F: Future>(&self, ctx: &WorkerContext, fut: F) -> Option<F::Output> {
        let every = self.config.grabber.heartbeat_interval();
        let mut ticks = tokio::time::interval_at(Instant::now() + every, every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                _ = ctx.shutdown().cancelled() => return None,
                out = &mut fut => return Some(out),
                _ = ticks.tick() => ctx.beat(),
            }
        }
    }

    // ── Connection phase ──

    async fn connect(&self, ctx: &WorkerContext) -> Result<LineReader, Stop> {
        let max_tries = self.config.grabber.max_connect_retries;

        'session: loop {
            let mut tries = 0;
            while tries < max_tries {
                ctx.beat();
                let Some(attempt) = self.beating(ctx, self.connector.connect()).await else {
                    return Err(Stop::Shutdown);
                };

                match attempt {
                    Ok(StreamResponse::Open(reader)) => return Ok(reader),
                    Ok(StreamResponse::RateLimited) => {
                        ctx.error("Connection failure - API rate limiting");
                        if !self.cool_down(ctx).await {
                            return Err(Stop::Shutdown);
                        }
                        continue 'session;
                    }
                    Ok(StreamResponse::Rejected { status, body }) => {
                        ctx.error(format!("{status} {body}"));
                        ctx.error("Connection failure");
                        return Err(Stop::Failed(WorkerOutcome::retryable(format!(
                            "stream endpoint answered {status}"
                        ))));
                    }
                    Err(e) => {
                        tries += 1;
                        ctx.error(format!("Connection failure - {e}"));
                    }
                }
            }

            ctx.error("Connection failure");
            return Err(Stop::Failed(WorkerOutcome::retryable(format!(
                "no connection after {max_tries} tries"
            ))));
        }
    }

    /// Sleep out a rate limit while still beating. `false` on shutdown.
    async fn cool_down(&self, ctx: &WorkerContext) -> bool {
        let cooldown = self.config.grabber.rate_limit_cooldown();
        tracing::info!(cooldown = ?cooldown, "rate limited, cooling down");
        self.beating(ctx, tokio::time::sleep(cooldown)).await.is_some()
    }

    // ── Read phase ──

    async fn read_records(
        &self,
        mut reader: LineReader,
        working: &mut WorkingFile,
        ctx: &WorkerContext,
    ) -> WorkerOutcome {
        let max_line = self.config.grabber.max_line_bytes;
        let mut line = Vec::with_capacity(4096);
        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = ctx.shutdown().cancelled() => return exit(working, ctx).await,
                r = read_line_capped(&mut reader, &mut line, max_line) => r,
            };

            let oversized = match read {
                Ok((0, _)) => {
                    if let Err(e) = working.with(RotatingWriter::finish).await {
                        return storage_failure(ctx, e);
                    }
                    ctx.error("Stream closed by server");
                    return WorkerOutcome::retryable("stream ended");
                }
                Ok((consumed, true)) => Some(consumed),
                Ok(_) => None,
                Err(e) => {
                    if let Err(e) = working.with(RotatingWriter::finish).await {
                        return storage_failure(ctx, e);
                    }
                    ctx.error(format!("Stream read failure - {e}"));
                    return WorkerOutcome::retryable(format!("stream read failed: {e}"));
                }
            };

            // keep-alive lines count as liveness too
            ctx.beat();

            if let Some(consumed) = oversized {
                ctx.error(format!("Discarded oversized message ({consumed} bytes)"));
                continue;
            }
            let record = line.trim_ascii();
            if record.is_empty() {
                continue;
            }
            if serde_json::from_slice::<IgnoredAny>(record).is_err() {
                ctx.error(format!("Got non-json message: {}", String::from_utf8_lossy(record)));
                continue;
            }

            let record = record.to_vec();
            match working.with(move |w| w.append(&record)).await {
                Ok(Some(name)) => ctx.log(format!("Rotated {name}")),
                Ok(None) => {}
                Err(e) => return storage_failure(ctx, e),
            }
        }
    }
}

/// Read one line into `line`, newline included.
///
/// A line longer than `max` bytes (newline excluded) is consumed but not
/// kept. Returns the bytes taken from the stream, 0 at end of stream, and
/// whether the line was over the cap.
async fn read_line_capped(
    reader: &mut LineReader,
    line: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<(usize, bool)> {
    let mut consumed = 0;
    let mut oversized = false;
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok((consumed, oversized));
            }
            let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (&available[..=i], true),
                None => (available, false),
            };
            if !oversized {
                if line.len() + chunk.len() - usize::from(done) > max {
                    oversized = true;
                    line.clear();
                } else {
                    line.extend_from_slice(chunk);
                }
            }
            (chunk.len(), done)
        };
        AsyncBufReadExt::consume(&mut *reader, used);
        consumed += used;
        if done {
            return Ok((consumed, oversized));
        }
    }
}

/// The writer of one run together with its turn on the working file.
///
/// Writer calls run on the blocking pool and take the writer (and the
/// lease) with them, so a run aborted mid-write keeps the working file
/// until that write returns.
struct WorkingFile(Option<(RotatingWriter, OwnedMutexGuard<()>)>);

impl WorkingFile {
    fn new(writer: RotatingWriter, lease: OwnedMutexGuard<()>) -> Self {
        Self(Some((writer, lease)))
    }

    async fn with<T, F>(&mut self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RotatingWriter) -> Result<T, EngineError> + Send + 'static,
    {
        let Some((mut writer, lease)) = self.0.take() else {
            return Err(EngineError::storage(
                "write",
                std::io::Error::other("working file lost by an earlier write"),
            ));
        };
        let (writer, lease, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut writer);
            (writer, lease, result)
        })
        .await?;
        self.0 = Some((writer, lease));
        result
    }
}

enum Stop {
    Shutdown,
    Failed(WorkerOutcome),
}

async fn exit(working: &mut WorkingFile, ctx: &WorkerContext) -> WorkerOutcome {
    if let Err(e) = working.with(RotatingWriter::finish).await {
        return storage_failure(ctx, e);
    }
    ctx.log("Exiting grabber");
    WorkerOutcome::Shutdown
}

fn storage_failure(ctx: &WorkerContext, e: EngineError) -> WorkerOutcome {
    ctx.error(format!("Storage failure - {e}"));
    WorkerOutcome::fatal(e.to_string())
}
