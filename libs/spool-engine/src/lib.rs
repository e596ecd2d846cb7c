//! Grabber, uploader and supervisor of the spool pipeline.
//!
//! ```text
//! stream ──► Grabber ──► storage dir ──► Uploader ──► sink
//!               │  heartbeat / log            │ log
//!               └──────────► Supervisor ◄─────┘
//! ```

pub mod config;
pub mod error;
pub mod grabber;
pub mod log_sink;
pub mod rotation;
pub mod storage;
pub mod supervisor;
pub mod uploader;
pub mod worker;

pub use config::SpoolConfig;
pub use error::EngineError;
pub use grabber::{Grabber, HttpStreamConnector, StreamConnector, StreamResponse};
pub use log_sink::LogSinks;
pub use storage::StorageDir;
pub use supervisor::{SlotState, Supervisor, WorkerFactory, WorkerFuture, Workers, worker_factory};
pub use uploader::{HttpUploadSink, UploadSink, Uploader};
pub use worker::{WorkerChannels, WorkerContext};
