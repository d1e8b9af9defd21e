//! Core data model definitions shared across CloudViz crates.
//!
//! Everything in here is plain data: job status payloads exchanged with the
//! backend, the provider-tagged resource graph produced by extraction jobs,
//! and the aggregated view built from completed extractions. Behaviour lives
//! in `cloudviz-core`.
#![allow(missing_docs)]

pub use ::chrono;

pub mod auth;
pub mod error;
pub mod ids;
pub mod inventory;
pub mod job;
pub mod provider;
pub mod render;
pub mod resource;
pub mod view;

// Intentionally curated re-exports for downstream consumers.
pub use auth::{AuthToken, Credentials};
pub use error::{ModelError, Result as ModelResult};
pub use ids::JobId;
pub use inventory::{JobResult, ResultStore};
pub use job::{
    ExtractionFilters, ExtractionRequest, JobKind, JobListQuery, JobListing, JobRequest,
    JobStatus, JobSubmission, StatusUpdate,
};
pub use provider::{CloudProvider, ExtractionScope};
pub use render::{InventorySource, OutputFormat, RenderArtifact, RenderRequest};
pub use resource::{CostCategory, EndpointRef, Relationship, Resource, ResourceCost};
pub use view::{AggregatedView, MergeWarning, ProviderSummary};
