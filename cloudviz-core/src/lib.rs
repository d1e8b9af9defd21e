//! Job orchestration and inventory aggregation for CloudViz.
//!
//! Extraction and render jobs run on a remote backend. This crate submits
//! them, follows each one to a terminal state over two racing channels (a
//! fixed-cadence [`Poller`] and an SSE [`PushChannel`]), and merges the
//! completed extraction results into one provider-keyed [`AggregatedView`].
//!
//! [`AggregatedView`]: cloudviz_model::AggregatedView
#![allow(missing_docs)]

pub mod aggregator;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod poller;
pub mod push;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use cloudviz_model as model;

pub use aggregator::Aggregator;
pub use catalog::InventoryCatalog;
pub use config::{ChannelConfig, ConfigSource, CoordinatorConfig};
pub use coordinator::{AwaitOptions, JobCoordinator};
pub use error::{CoreError, Result};
pub use job::{Applied, JobFailure, JobOutcome, JobRecord, UpdateSource};
pub use orchestrator::{BatchReport, JobOrchestrator};
pub use poller::Poller;
pub use push::PushChannel;
pub use session::{Session, SessionEvent};
pub use transport::{
    HttpTransport, JobBackend, PushSource, SsePushSource, StatusStream, TransportError,
};
