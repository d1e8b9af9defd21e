use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModelError;
use crate::ids::JobId;
use crate::provider::{CloudProvider, ExtractionScope};
use crate::render::RenderRequest;

/// The two kinds of backend work this layer knows how to track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Extraction,
    Render,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Extraction => "extraction",
            JobKind::Render => "render",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extraction" | "extract" => Ok(JobKind::Extraction),
            "render" => Ok(JobKind::Render),
            other => Err(ModelError::UnknownJobKind(other.to_string())),
        }
    }
}

/// Backend-reported lifecycle state.
///
/// The backend may also report `cancelled`; the core never cancels backend
/// work itself, so a backend-side cancellation is folded into `Failed` and the
/// accompanying message carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    #[serde(alias = "cancelled", alias = "canceled")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" | "cancelled" | "canceled" => Ok(JobStatus::Failed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// One status observation, identical whether it came from a poll response or
/// from the push stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// Percentage in `0..=100`. Fractional or out-of-range values on the wire
    /// are rounded and clamped.
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus, progress: u8) -> Self {
        Self {
            status,
            progress: progress.min(100),
            error: None,
            message: None,
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn pending() -> Self {
        Self::new(JobStatus::Pending, 0)
    }

    pub fn running(progress: u8) -> Self {
        Self::new(JobStatus::Running, progress)
    }

    pub fn completed() -> Self {
        Self::new(JobStatus::Completed, 100)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(JobStatus::Failed, 0)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }
}

fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let value = match raw {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(serde::de::Error::custom)?,
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "progress must be a number, got {other}"
            )));
        }
    };
    if value.is_nan() {
        return Ok(0);
    }
    Ok(value.round().clamp(0.0, 100.0) as u8)
}

/// Optional narrowing of an extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionFilters {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ExtractionFilters {
    pub fn is_empty(&self) -> bool {
        self.resource_types.is_empty() && self.regions.is_empty() && self.tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub provider: CloudProvider,
    pub scope: ExtractionScope,
    /// Subscription id, resource group name, region name and so on,
    /// depending on `scope`.
    pub scope_identifier: String,
    #[serde(default, skip_serializing_if = "ExtractionFilters::is_empty")]
    pub filters: ExtractionFilters,
    #[serde(default = "default_include_relationships")]
    pub include_relationships: bool,
}

fn default_include_relationships() -> bool {
    true
}

impl ExtractionRequest {
    pub fn new(
        provider: CloudProvider,
        scope: ExtractionScope,
        scope_identifier: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            scope,
            scope_identifier: scope_identifier.into(),
            filters: ExtractionFilters::default(),
            include_relationships: true,
        }
    }

    pub fn with_filters(mut self, filters: ExtractionFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// A unit of work to submit, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "parameters", rename_all = "lowercase")]
pub enum JobRequest {
    Extraction(ExtractionRequest),
    Render(RenderRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Extraction(_) => JobKind::Extraction,
            JobRequest::Render(_) => JobKind::Render,
        }
    }

    /// Short label used in logs.
    pub fn scope_label(&self) -> String {
        match self {
            JobRequest::Extraction(req) => {
                format!("{}:{}:{}", req.provider, req.scope, req.scope_identifier)
            }
            JobRequest::Render(req) => format!("render:{}", req.format),
        }
    }
}

impl From<ExtractionRequest> for JobRequest {
    fn from(value: ExtractionRequest) -> Self {
        JobRequest::Extraction(value)
    }
}

impl From<RenderRequest> for JobRequest {
    fn from(value: RenderRequest) -> Self {
        JobRequest::Render(value)
    }
}

/// Backend acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

/// Listing filter for jobs the backend already knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListQuery {
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    pub limit: usize,
}

impl JobListQuery {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            status: None,
            limit: 50,
        }
    }
}

/// One entry of a job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub id: JobId,
    #[serde(flatten)]
    pub update: StatusUpdate,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
