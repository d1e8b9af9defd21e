use thiserror::Error;

use crate::job::JobFailure;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The wait ended without a usable result.
    #[error("Job {job_id} did not complete: {outcome}")]
    Incomplete {
        job_id: String,
        outcome: &'static str,
        failure: Option<JobFailure>,
    },

    #[error("Unexpected result for {job_id}: expected {expected}")]
    UnexpectedResult { job_id: String, expected: &'static str },
}

impl CoreError {
    /// True when the failure came from a rejected or missing session.
    pub fn is_session_invalid(&self) -> bool {
        matches!(
            self,
            CoreError::Transport(TransportError::SessionInvalid)
                | CoreError::Incomplete {
                    failure: Some(JobFailure::SessionInvalid),
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
