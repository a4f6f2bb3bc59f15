use chrono::{DateTime, FixedOffset};
use tasknode_core::types::JobId;
use tokio_util::sync::CancellationToken;

/// A due job handed from the poller to the dispatch consumer.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job_id: JobId,
    /// Fire time the entry was armed for.
    pub fire_at: DateTime<FixedOffset>,
    /// Arm generation; [`crate::Scheduler::rearm`] only succeeds while it is current.
    pub generation: u64,
    /// Child of the job's arm token, cancelled by `disarm`.
    pub token: CancellationToken,
}
