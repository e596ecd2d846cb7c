use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use spool_api::WorkerOutcome;

use crate::config::{SpoolConfig, UploaderConfig};
use crate::error::EngineError;
use crate::storage::StorageDir;
use crate::supervisor::{WorkerFactory, worker_factory};
use crate::worker::WorkerContext;

/// Multipart field carrying the file.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Transport(String),

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// Delivers one completed file. One call is one attempt.
pub trait UploadSink: Send + Sync {
    fn upload(
        &self,
        name: String,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, UploadError>> + Send + '_>>;
}

/// How the uploader treats a sink answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// 201: delete the local file.
    Accepted,
    /// 5xx: the attempt failed, try again.
    Failed,
    /// Anything else: the sink refused this file.
    Rejected,
}

pub fn classify_status(status: u16) -> UploadStatus {
    match status {
        201 => UploadStatus::Accepted,
        500..=599 => UploadStatus::Failed,
        _ => UploadStatus::Rejected,
    }
}

// ═══════════════════════════════════════════════════════════════
//  HTTP sink
// ═══════════════════════════════════════════════════════════════

pub struct HttpUploadSink {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpUploadSink {
    pub fn new(config: &UploaderConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(config.upload_timeout())
            .build()?;
        Ok(Self {
            http,
            url: config.upload_url.clone(),
            timeout: config.upload_timeout(),
        })
    }

    fn error(&self, e: reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout(self.timeout)
        } else {
            UploadError::Transport(e.to_string())
        }
    }
}

impl UploadSink for HttpUploadSink {
    fn upload(
        &self,
        name: String,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, UploadError>> + Send + '_>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(content).file_name(name);
            let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

            let resp = self
                .http
                .post(&self.url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| self.error(e))?;

            let status = resp.status().as_u16();
            let body = resp.text().await.map_err(|e| self.error(e))?;
            Ok(UploadResponse { status, body })
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Uploader: completed files → sink
// ═══════════════════════════════════════════════════════════════

/// Transporter: uploads completed files oldest first and deletes them once
/// the sink acknowledges with 201.
pub struct Uploader {
    sink: Arc<dyn UploadSink>,
    config: Arc<SpoolConfig>,
    storage: StorageDir,
}

enum Delivery {
    Done,
    Stop(WorkerOutcome),
}

impl Uploader {
    pub fn new(sink: Arc<dyn UploadSink>, config: Arc<SpoolConfig>) -> Self {
        let storage = config.storage();
        Self { sink, config, storage }
    }

    pub fn http(config: Arc<SpoolConfig>) -> Result<Self, EngineError> {
        let sink = HttpUploadSink::new(&config.uploader)?;
        Ok(Self::new(Arc::new(sink), config))
    }

    pub fn into_factory(self) -> WorkerFactory {
        let uploader = Arc::new(self);
        worker_factory(move |ctx| {
            let uploader = uploader.clone();
            async move { uploader.run(ctx).await }
        })
    }

    pub async fn run(&self, ctx: WorkerContext) -> WorkerOutcome {
        let cfg = &self.config.uploader;
        tracing::info!(url = %cfg.upload_url, dir = %self.storage.root().display(), "uploader starting");

        if let Err(e) = self.storage.ensure() {
            return storage_failure(&ctx, e);
        }

        // per-run memory; a respawned uploader starts counting from zero
        let mut rejections: HashMap<String, u32> = HashMap::new();

        loop {
            if ctx.is_shutdown() {
                return exit(&ctx);
            }

            let name = match self.storage.select_oldest(cfg.strict_names) {
                Ok(Some(name)) => name,
                Ok(None) => {
                    tokio::select! {
                        biased;
                        _ = ctx.shutdown().cancelled() => return exit(&ctx),
                        _ = tokio::time::sleep(cfg.idle_interval()) => continue,
                    }
                }
                Err(e) => return storage_failure(&ctx, e),
            };

            if let Delivery::Stop(outcome) = self.deliver(&ctx, &name, &mut rejections).await {
                return outcome;
            }
        }
    }

    async fn deliver(&self, ctx: &WorkerContext, name: &str, rejections: &mut HashMap<String, u32>) -> Delivery {
        let cfg = &self.config.uploader;

        let content = match self.storage.read(name).await {
            Ok(content) => content,
            Err(e) if e.io_kind() == Some(ErrorKind::NotFound) => {
                tracing::debug!(file = %name, "file vanished before upload");
                return Delivery::Done;
            }
            Err(e) => return Delivery::Stop(storage_failure(ctx, e)),
        };

        for attempt in 1..=cfg.max_upload_retries {
            tracing::debug!(file = %name, attempt, bytes = content.len(), "uploading");

            let resp = match self.sink.upload(name.to_string(), content.clone()).await {
                Ok(resp) => resp,
                Err(e) => {
                    ctx.error(format!("Upload failure - {e}"));
                    continue;
                }
            };

            match classify_status(resp.status) {
                UploadStatus::Accepted => {
                    ctx.log(format!("{} {}", resp.status, resp.body));
                    rejections.remove(name);
                    if let Err(e) = self.storage.remove(name) {
                        return Delivery::Stop(storage_failure(ctx, e));
                    }
                    return Delivery::Done;
                }
                UploadStatus::Failed => {
                    ctx.error(format!("{} {}", resp.status, resp.body));
                }
                UploadStatus::Rejected => {
                    ctx.error(format!("{} {}", resp.status, resp.body));
                    return self.reject(ctx, name, rejections);
                }
            }
        }

        ctx.error("Connection failure");
        Delivery::Stop(WorkerOutcome::retryable(format!(
            "{name}: no successful upload after {} attempts",
            cfg.max_upload_retries
        )))
    }

    /// Count a rejection; quarantine the file once it has too many.
    fn reject(&self, ctx: &WorkerContext, name: &str, rejections: &mut HashMap<String, u32>) -> Delivery {
        let cfg = &self.config.uploader;
        let count = rejections.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count < cfg.max_rejections {
            return Delivery::Done;
        }

        let count = *count;
        rejections.remove(name);
        match self.storage.quarantine(name, &cfg.quarantine_dir) {
            Ok(path) => {
                ctx.error(format!("Quarantined {name} after {count} rejections"));
                tracing::warn!(file = %name, to = %path.display(), "file quarantined");
                Delivery::Done
            }
            Err(e) if e.io_kind() == Some(ErrorKind::NotFound) => Delivery::Done,
            Err(e) => Delivery::Stop(storage_failure(ctx, e)),
        }
    }
}

fn exit(ctx: &WorkerContext) -> WorkerOutcome {
    ctx.log("Exiting uploader");
    WorkerOutcome::Shutdown
}

fn storage_failure(ctx: &WorkerContext, e: EngineError) -> WorkerOutcome {
    ctx.error(format!("Storage failure - {e}"));
    WorkerOutcome::fatal(e.to_string())
}
