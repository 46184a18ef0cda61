//! Remote Restyle Job Orchestration
//!
//! This library drives a two-stage remote image transformation: a room photo
//! is uploaded, the remote worker empties the room, and after the caller picks
//! a style the worker applies it. The orchestrator tracks, polls and recovers
//! the job while staying cancellable at every suspension point.

pub mod config;
pub mod db;
pub mod models;
pub mod services;

pub use models::job::{ErrorKind, ErrorRecord, Job, RetryAction, Stage, StyleId};
pub use services::orchestrator::{JobEvent, JobOrchestrator, OrchestratorSettings};
