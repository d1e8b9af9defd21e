use std::fmt;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use cloudviz_model::{JobId, JobKind, JobResult, JobStatus, JobSubmission, StatusUpdate};

/// Where a status write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    Submit,
    Poll,
    Push,
    /// Synthesized by the core itself (exhausted retries, rejected session).
    Local,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Submit => "submit",
            UpdateSource::Poll => "poll",
            UpdateSource::Push => "push",
            UpdateSource::Local => "local",
        }
    }
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    /// The backend itself reported the job as failed (or cancelled).
    #[error("backend reported failure: {message}")]
    BackendFailure { message: String },

    /// The poll budget ran out on consecutive transport errors.
    #[error("gave up after {attempts} consecutive transport failures: {last_error}")]
    TransportExhausted { attempts: u32, last_error: String },

    #[error("session invalid")]
    SessionInvalid,

    /// The backend refused a request for this job outright.
    #[error("backend rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Result of offering an update to a [`JobRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Non-terminal update folded into the record.
    Updated,
    /// This update moved the record into its terminal state.
    Terminal,
    /// The record was already terminal; nothing changed.
    Discarded,
}

/// Lifecycle state of one backend job.
///
/// All writes go through [`JobRecord::apply`] or [`JobRecord::fail_locally`],
/// which accept exactly one terminal transition and discard everything after
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    id: JobId,
    kind: JobKind,
    status: JobStatus,
    progress: u8,
    error: Option<String>,
    message: Option<String>,
    failure: Option<JobFailure>,
    terminal_source: Option<UpdateSource>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: JobId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            message: None,
            failure: None,
            terminal_source: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Record for a freshly accepted submission. A backend that already
    /// reports a later status at submission time gets it applied right away.
    pub fn from_submission(submission: &JobSubmission, kind: JobKind) -> Self {
        let mut record = Self::new(submission.job_id.clone(), kind);
        if !submission.message.is_empty() {
            record.message = Some(submission.message.clone());
        }
        if submission.status != JobStatus::Pending {
            let mut update = StatusUpdate::new(submission.status, 0);
            if !submission.message.is_empty() {
                update = update.with_message(submission.message.clone());
            }
            record.apply(&update, UpdateSource::Submit);
        }
        record
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Present only once the record is FAILED.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    /// Channel whose update was accepted as terminal.
    pub fn terminal_source(&self) -> Option<UpdateSource> {
        self.terminal_source
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold one status observation into the record.
    ///
    /// Status never moves backwards: a PENDING report after RUNNING keeps the
    /// record RUNNING. Progress is the maximum seen so far from any channel.
    pub fn apply(&mut self, update: &StatusUpdate, source: UpdateSource) -> Applied {
        if self.is_terminal() {
            return Applied::Discarded;
        }

        let stamp = self.next_stamp(update.updated_at);
        if update.message.is_some() {
            self.message = update.message.clone();
        }

        match update.status {
            JobStatus::Completed => {
                self.mark_started(update.started_at, stamp);
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.finish(update.completed_at, stamp, source);
                Applied::Terminal
            }
            JobStatus::Failed => {
                let message = update
                    .error
                    .clone()
                    .or_else(|| update.message.clone())
                    .unwrap_or_else(|| "job failed".to_string());
                self.status = JobStatus::Failed;
                self.progress = self.progress.max(update.progress);
                self.error = Some(message.clone());
                self.failure = Some(JobFailure::BackendFailure { message });
                self.finish(update.completed_at, stamp, source);
                Applied::Terminal
            }
            JobStatus::Pending | JobStatus::Running => {
                if update.status == JobStatus::Running || update.progress > 0 {
                    self.mark_started(update.started_at, stamp);
                    self.status = JobStatus::Running;
                }
                self.progress = self.progress.max(update.progress.min(100));
                self.updated_at = stamp;
                Applied::Updated
            }
        }
    }

    /// Fail the record without a backend report, through the same single
    /// terminal gate as [`apply`](Self::apply).
    pub fn fail_locally(&mut self, failure: JobFailure) -> Applied {
        if self.is_terminal() {
            return Applied::Discarded;
        }
        let stamp = self.next_stamp(Utc::now());
        self.status = JobStatus::Failed;
        self.error = Some(failure.to_string());
        self.failure = Some(failure);
        self.finish(None, stamp, UpdateSource::Local);
        Applied::Terminal
    }

    fn mark_started(&mut self, reported: Option<DateTime<Utc>>, stamp: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(reported.unwrap_or(stamp));
        }
    }

    fn finish(
        &mut self,
        reported: Option<DateTime<Utc>>,
        stamp: DateTime<Utc>,
        source: UpdateSource,
    ) {
        self.updated_at = stamp;
        self.completed_at = Some(reported.unwrap_or(stamp));
        self.terminal_source = Some(source);
    }

    /// `updated_at` strictly increases on every accepted write, even when a
    /// late push event carries an older timestamp than the last poll.
    fn next_stamp(&self, reported: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.updated_at + Duration::microseconds(1);
        reported.max(floor)
    }
}

/// How a wait on a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { record: JobRecord, result: JobResult },
    Failed { record: JobRecord, failure: JobFailure },
    /// The caller cancelled the wait. The backend job was left alone.
    Cancelled { record: JobRecord },
    /// The caller's deadline passed first. No partial result is returned.
    TimedOut { record: JobRecord },
}

impl JobOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            JobOutcome::Completed { record, .. }
            | JobOutcome::Failed { record, .. }
            | JobOutcome::Cancelled { record }
            | JobOutcome::TimedOut { record } => record,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Cancelled { .. } => "cancelled",
            JobOutcome::TimedOut { .. } => "timed_out",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn result(&self) -> Option<&JobResult> {
        match self {
            JobOutcome::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<JobResult> {
        match self {
            JobOutcome::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
