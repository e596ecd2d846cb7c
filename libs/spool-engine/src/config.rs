use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use spool_api::naming;

use crate::error::EngineError;
use crate::storage::StorageDir;

/// Root configuration. Parsed once from TOML, then shared read-only
/// (`Arc<SpoolConfig>`) by every component.
#[derive(Debug, Clone, Deserialize)]
pub struct SpoolConfig {
    /// Directory shared by the grabber (producer) and the uploader (consumer).
    #[serde(default = "default_storage_directory")]
    pub storage_directory: PathBuf,

    /// Reserved name of the grabber's working file inside `storage_directory`.
    #[serde(default = "default_working_file")]
    pub working_file: String,

    /// Prefix of completed file names.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Directory holding `error.log` and `upload.log`.
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    #[serde(default)]
    pub grabber: GrabberConfig,

    #[serde(default)]
    pub uploader: UploaderConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("data")
}
fn default_working_file() -> String {
    "working.tmp".into()
}
fn default_file_prefix() -> String {
    "stream-".into()
}
fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

// ═══════════════════════════════════════════════════════════════
//  Grabber
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Credentials attached to the stream request. How they were obtained is
/// not our concern.
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::None => f.write_str("None"),
            AuthConfig::Bearer { .. } => f.write_str("Bearer(***)"),
            AuthConfig::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrabberConfig {
    pub stream_url: String,
    pub method: HttpMethod,
    pub auth: AuthConfig,
    /// Connection attempts per run before the grabber gives up.
    pub max_connect_retries: u32,
    pub connect_timeout_ms: u64,
    /// A working file larger than this is rotated.
    pub cut_size_bytes: u64,
    /// In-memory buffer size that triggers a write to the working file.
    pub flush_threshold_bytes: usize,
    /// Longest accepted record; longer lines are discarded.
    pub max_line_bytes: usize,
    /// Pause after a rate-limit response.
    pub rate_limit_cooldown_ms: u64,
    /// Heartbeat period while the grabber pauses on purpose.
    pub heartbeat_interval_ms: u64,
    /// First disambiguator tried when naming a completed file.
    pub disambiguator_start: u32,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            stream_url: String::new(),
            method: HttpMethod::Get,
            auth: AuthConfig::None,
            max_connect_retries: 3,
            connect_timeout_ms: 10_000,
            cut_size_bytes: 10 * 1024 * 1024,
            flush_threshold_bytes: 1024 * 1024,
            max_line_bytes: 1024 * 1024,
            rate_limit_cooldown_ms: 30_000,
            heartbeat_interval_ms: 500,
            disambiguator_start: 0,
        }
    }
}

impl GrabberConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Uploader
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub upload_url: String,
    /// Upload attempts per file before the uploader gives up.
    pub max_upload_retries: u32,
    /// Per-attempt request timeout.
    pub upload_timeout_ms: u64,
    /// Sleep when the storage directory has nothing to upload.
    pub idle_interval_ms: u64,
    /// Only pick up files that follow the completed naming convention.
    pub strict_names: bool,
    /// Rejections of one file before it is moved to quarantine.
    pub max_rejections: u32,
    /// Quarantine directory, relative to the storage directory.
    pub quarantine_dir: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            max_upload_retries: 3,
            upload_timeout_ms: 2_000,
            idle_interval_ms: 10_000,
            strict_names: true,
            max_rejections: 5,
            quarantine_dir: "quarantine".into(),
        }
    }
}

impl UploaderConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Supervisor
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Grabber silence longer than this counts as a hang.
    pub heartbeat_timeout_ms: u64,
    /// Extra time granted to a freshly started grabber before its first beat.
    pub restart_grace_ms: u64,
    pub poll_interval_ms: u64,
    /// Delay before respawning a worker that stopped on its own.
    pub respawn_delay_ms: u64,
    /// Delay before respawning a worker that reported a fatal failure.
    pub fatal_respawn_delay_ms: u64,
    /// How long workers get to exit after a shutdown request.
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 5_000,
            restart_grace_ms: 5_000,
            poll_interval_ms: 50,
            respawn_delay_ms: 1_000,
            fatal_respawn_delay_ms: 10_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }
    pub fn fatal_respawn_delay(&self) -> Duration {
        Duration::from_millis(self.fatal_respawn_delay_ms)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Loading
// ═══════════════════════════════════════════════════════════════

impl SpoolConfig {
    /// Configuration with every default and the two required endpoints.
    pub fn new(stream_url: impl Into<String>, upload_url: impl Into<String>) -> Self {
        Self {
            storage_directory: default_storage_directory(),
            working_file: default_working_file(),
            file_prefix: default_file_prefix(),
            log_directory: default_log_directory(),
            grabber: GrabberConfig {
                stream_url: stream_url.into(),
                ..GrabberConfig::default()
            },
            uploader: UploaderConfig {
                upload_url: upload_url.into(),
                ..UploaderConfig::default()
            },
            supervisor: SupervisorConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| match e {
            EngineError::Config(msg) => EngineError::Config(format!("{path}: {msg}")),
            other => other,
        })
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: SpoolConfig =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| -> Result<(), EngineError> { Err(EngineError::Config(msg)) };

        if self.grabber.stream_url.is_empty() {
            return invalid("grabber.stream_url is required".into());
        }
        if self.uploader.upload_url.is_empty() {
            return invalid("uploader.upload_url is required".into());
        }
        if self.working_file.is_empty() || self.working_file.contains(['/', '\\']) {
            return invalid(format!("working_file '{}' must be a plain file name", self.working_file));
        }
        if naming::is_completed_name(&self.file_prefix, &self.working_file) {
            return invalid(format!(
                "working_file '{}' collides with the completed file naming convention",
                self.working_file
            ));
        }
        if self.grabber.max_connect_retries == 0 {
            return invalid("grabber.max_connect_retries must be at least 1".into());
        }
        if self.grabber.cut_size_bytes == 0 {
            return invalid("grabber.cut_size_bytes must be positive".into());
        }
        if self.grabber.max_line_bytes == 0 {
            return invalid("grabber.max_line_bytes must be positive".into());
        }
        if self.grabber.heartbeat_interval_ms == 0 {
            return invalid("grabber.heartbeat_interval_ms must be positive".into());
        }
        if self.uploader.max_upload_retries == 0 {
            return invalid("uploader.max_upload_retries must be at least 1".into());
        }
        if self.uploader.max_rejections == 0 {
            return invalid("uploader.max_rejections must be at least 1".into());
        }
        if self.uploader.quarantine_dir.is_empty() {
            return invalid("uploader.quarantine_dir must not be empty".into());
        }
        if self.supervisor.heartbeat_timeout_ms <= self.grabber.heartbeat_interval_ms {
            return invalid(format!(
                "supervisor.heartbeat_timeout_ms ({}) must exceed grabber.heartbeat_interval_ms ({})",
                self.supervisor.heartbeat_timeout_ms, self.grabber.heartbeat_interval_ms
            ));
        }
        if self.supervisor.poll_interval_ms == 0 {
            return invalid("supervisor.poll_interval_ms must be positive".into());
        }
        Ok(())
    }

    /// Storage directory handle shared by grabber and uploader.
    pub fn storage(&self) -> StorageDir {
        StorageDir::new(
            self.storage_directory.clone(),
            self.working_file.clone(),
            self.file_prefix.clone(),
        )
    }
}
