//! Backend access: job submission, status and result fetches, the push
//! subscription, and the authentication exchange.
//!
//! Every backend outcome is folded into [`TransportError`] so the poller and
//! coordinator only ever reason about three shapes of failure.

pub mod http;
pub mod routes;
pub mod sse;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use cloudviz_model::{
    AuthToken, Credentials, JobId, JobKind, JobListQuery, JobListing, JobRequest, JobResult,
    JobSubmission, StatusUpdate,
};

pub use http::HttpTransport;
pub use sse::SsePushSource;

/// Normalized failure of a single backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The backend understood the request and refused it (4xx other than 401).
    #[error("request rejected with status {status}: {message}")]
    Client { status: u16, message: String },

    /// Network failure, timeout, 5xx or an unreadable body.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// No usable token, or the backend answered 401. The stored token has
    /// already been cleared when this is returned.
    #[error("session invalid: unauthorized")]
    SessionInvalid,
}

impl TransportError {
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        TransportError::Client {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        TransportError::Transport {
            message: message.into(),
        }
    }

    /// Only transport failures are worth repeating.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transport { .. })
    }

    /// HTTP status associated with the failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Client { status, .. } => Some(*status),
            TransportError::SessionInvalid => Some(401),
            TransportError::Transport { .. } => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::transport(err.to_string())
    }
}

/// Stream of status updates for one job, in the poll-response shape.
pub type StatusStream = BoxStream<'static, Result<StatusUpdate, TransportError>>;

/// Request/response contract with the job backend.
///
/// Implementations that hold a session are the only code allowed to change
/// its token: `login` stores the new token, `logout` and 401 responses clear
/// it.
#[async_trait]
pub trait JobBackend: Send + Sync + fmt::Debug {
    async fn submit(&self, request: &JobRequest) -> Result<JobSubmission, TransportError>;

    async fn fetch_status(
        &self,
        job_id: &JobId,
        kind: JobKind,
    ) -> Result<StatusUpdate, TransportError>;

    async fn fetch_result(
        &self,
        job_id: &JobId,
        kind: JobKind,
    ) -> Result<JobResult, TransportError>;

    async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<JobListing>, TransportError>;

    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, TransportError>;

    async fn logout(&self) -> Result<(), TransportError>;
}

/// Out-of-band per-job event subscription.
///
/// The returned stream ends, or yields one error and then ends, when the
/// connection is lost. It never reconnects on its own.
#[async_trait]
pub trait PushSource: Send + Sync + fmt::Debug {
    async fn subscribe(&self, job_id: &JobId, kind: JobKind)
    -> Result<StatusStream, TransportError>;
}
