//! Sync jobs
//!
//! A [`SyncJob`] drives one adapter's `sync_to_cache` for one resource type
//! under the retry strategy, tracks its lifecycle, and tells listeners about
//! progress, completion and failure.

mod job;
mod listeners;

pub use job::{generate_job_id, JobStatus, JobStatusReport, SyncJob};
pub use listeners::{ListenerId, SyncPhase, SyncProgress};
