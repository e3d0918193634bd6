//! Job record model and lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::handler_path::HandlerPath;
use crate::id::JobId;

/// How long a `processing` record may go without finishing before another claim may
/// treat it as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Job lifecycle status.
///
/// Moves forward only: `Pending -> Processing -> {Completed | Failed}`. A stale
/// `Processing` record may be claimed again, which refreshes `started_at` but keeps
/// the status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a worker
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error message
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses a caller may attach to instead of enqueueing a duplicate.
    pub fn is_reusable(&self) -> bool {
        !matches!(self, JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// A durable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Unit of work to invoke. Stored raw: the worker re-resolves it before running.
    pub handler_path: String,
    /// Passed verbatim to the handler.
    pub args: serde_json::Value,
    /// Shared secret embedded by the creator. Empty means missing.
    pub secret: String,
    pub status: JobStatus,
    /// Set only when `status == Completed`.
    pub result: Option<serde_json::Value>,
    /// Set only when `status == Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// After this instant the record may disappear at any time.
    pub expires_at: DateTime<Utc>,
}

impl JobRecord {
    /// Materialize a freshly created `pending` record.
    pub fn from_new(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            handler_path: new.handler_path,
            args: new.args,
            secret: new.secret,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: new.created_at,
            started_at: None,
            completed_at: None,
            expires_at: new.expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// A `processing` record whose claim is older than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match self.started_at {
            Some(started) => now
                .checked_sub_signed(to_chrono(stale_after))
                .is_some_and(|cutoff| started < cutoff),
            None => true,
        }
    }

    /// Whether `claim_next` may hand this record out.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        !self.is_expired(now)
            && (self.status == JobStatus::Pending || self.is_stale(now, stale_after))
    }

    /// Claim transition. Callers must have checked [`JobRecord::is_claimable`].
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
    }

    /// Terminal success. Returns `false` (and changes nothing) unless the record is
    /// currently `processing`.
    pub fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
        true
    }

    /// Terminal failure. Same guard as [`JobRecord::mark_completed`].
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        true
    }
}

/// Insert request for a new `pending` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub handler_path: String,
    pub args: serde_json::Value,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewJob {
    /// A job created now that expires after `ttl`.
    pub fn new(
        handler_path: &HandlerPath,
        args: serde_json::Value,
        secret: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            handler_path: handler_path.as_str().to_string(),
            args,
            secret: secret.into(),
            created_at: now,
            expires_at: now
                .checked_add_signed(to_chrono(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// Per-status counts over live (non-expired) records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_path::HandlerRoot;

    fn new_record() -> JobRecord {
        let path = HandlerRoot::default().resolve("echo").unwrap();
        let new = NewJob::new(
            &path,
            serde_json::json!({"key": "value"}),
            "s3cret",
            Duration::from_secs(3600),
        );
        JobRecord::from_new(JobId::new(), new)
    }

    #[test]
    fn job_lifecycle() {
        let mut job = new_record();
        let now = Utc::now();

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.is_claimable(now, DEFAULT_STALE_AFTER));

        job.mark_processing(now);
        assert_eq!(job.status, JobStatus::Processing);
        assert!(!job.is_claimable(now, DEFAULT_STALE_AFTER));

        assert!(job.mark_completed(serde_json::json!({"value": 42}), now));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(serde_json::json!({"value": 42})));
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_records_ignore_further_transitions() {
        let mut job = new_record();
        let now = Utc::now();
        job.mark_processing(now);
        assert!(job.mark_failed("boom", now));

        assert!(!job.mark_completed(serde_json::json!(1), now));
        assert!(!job.mark_failed("again", now));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
    }

    #[test]
    fn pending_records_cannot_be_finished_without_a_claim() {
        let mut job = new_record();
        assert!(!job.mark_completed(serde_json::json!(1), Utc::now()));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn processing_becomes_claimable_after_stale_window() {
        let mut job = new_record();
        let claimed_at = Utc::now() - chrono::Duration::minutes(6);
        job.mark_processing(claimed_at);

        let now = Utc::now();
        assert!(job.is_stale(now, DEFAULT_STALE_AFTER));
        assert!(job.is_claimable(now, DEFAULT_STALE_AFTER));
        assert!(!job.is_stale(now, Duration::from_secs(10 * 60)));
    }

    #[test]
    fn expired_records_are_never_claimable() {
        let mut job = new_record();
        job.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(job.is_expired(Utc::now()));
        assert!(!job.is_claimable(Utc::now(), DEFAULT_STALE_AFTER));
    }

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(matches!(
            "running".parse::<JobStatus>(),
            Err(DomainError::UnknownStatus(_))
        ));
    }

    #[test]
    fn stats_count_by_status() {
        let mut stats = JobStats::default();
        stats.record(JobStatus::Pending);
        stats.record(JobStatus::Pending);
        stats.record(JobStatus::Failed);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
