//! Shared vocabulary between the spool workers and their supervisor.
//!
//! Nothing in this crate does I/O: it defines the signals a worker can emit
//! (heartbeats and log events), the outcome a worker returns when it stops,
//! and the naming convention of rotated files in the storage directory.

pub mod naming;
pub mod outcome;
pub mod signal;
mod util;

pub use outcome::{FailureClass, WorkerFailure, WorkerOutcome};
pub use signal::{Heartbeat, LogEvent, LogKind, WorkerKind};
pub use util::{unix_now_secs, unix_now_secs_f64};
