#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cloudviz_core::model::{
    AuthToken, CloudProvider, Credentials, ExtractionRequest, JobId, JobKind, JobListQuery,
    JobListing, JobRequest, JobResult, JobStatus, JobSubmission, Resource, ResourceCost,
    ResultStore, StatusUpdate,
};
use cloudviz_core::{
    ChannelConfig, CoordinatorConfig, JobBackend, PushSource, Session, StatusStream,
    TransportError,
};

pub type Scripted<T> = Result<T, TransportError>;

#[derive(Default)]
struct BackendState {
    statuses: HashMap<JobId, VecDeque<Scripted<StatusUpdate>>>,
    results: HashMap<JobId, VecDeque<Scripted<JobResult>>>,
    rejected_scopes: HashMap<String, TransportError>,
    listings: Vec<JobListing>,
}

/// In-memory backend driven by per-job scripts. The last scripted item of a
/// queue repeats forever, so a single `running` entry models a job that never
/// finishes.
#[derive(Debug)]
pub struct ScriptedBackend {
    state: RwLock<BackendState>,
    session: Option<Arc<Session>>,
    pub status_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
}

impl std::fmt::Debug for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendState")
            .field("jobs", &self.statuses.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BackendState::default()),
            session: None,
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        }
    }

    /// Every call first checks the session, like the HTTP transport does.
    pub fn with_session(session: Arc<Session>) -> Self {
        Self {
            session: Some(session),
            ..Self::new()
        }
    }

    pub async fn script_status(
        &self,
        job_id: &str,
        script: impl IntoIterator<Item = Scripted<StatusUpdate>>,
    ) {
        self.state
            .write()
            .await
            .statuses
            .insert(JobId::from(job_id), script.into_iter().collect());
    }

    pub async fn script_result(
        &self,
        job_id: &str,
        script: impl IntoIterator<Item = Scripted<JobResult>>,
    ) {
        self.state
            .write()
            .await
            .results
            .insert(JobId::from(job_id), script.into_iter().collect());
    }

    pub async fn reject_scope(&self, scope_identifier: &str, error: TransportError) {
        self.state
            .write()
            .await
            .rejected_scopes
            .insert(scope_identifier.to_string(), error);
    }

    pub async fn add_listing(&self, listing: JobListing) {
        self.state.write().await.listings.push(listing);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    fn check_session(&self) -> Result<(), TransportError> {
        match &self.session {
            Some(session) => session.bearer().map(|_| ()),
            None => Ok(()),
        }
    }
}

fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Job ids handed out by the fake: `job-<scope identifier>`.
pub fn job_id_for(request: &ExtractionRequest) -> JobId {
    JobId::new(format!("job-{}", request.scope_identifier))
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn submit(&self, request: &JobRequest) -> Result<JobSubmission, TransportError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session()?;
        let job_id = match request {
            JobRequest::Extraction(extraction) => {
                if let Some(err) = self
                    .state
                    .read()
                    .await
                    .rejected_scopes
                    .get(&extraction.scope_identifier)
                {
                    return Err(err.clone());
                }
                job_id_for(extraction)
            }
            JobRequest::Render(_) => JobId::from("render-1"),
        };
        Ok(JobSubmission {
            job_id,
            status: JobStatus::Pending,
            message: "accepted".into(),
            estimated_duration_seconds: Some(60),
            result_url: None,
        })
    }

    async fn fetch_status(
        &self,
        job_id: &JobId,
        _kind: JobKind,
    ) -> Result<StatusUpdate, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session()?;
        let mut state = self.state.write().await;
        state
            .statuses
            .get_mut(job_id)
            .and_then(next_scripted)
            .unwrap_or_else(|| Err(TransportError::client(404, "job not found")))
    }

    async fn fetch_result(
        &self,
        job_id: &JobId,
        _kind: JobKind,
    ) -> Result<JobResult, TransportError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session()?;
        let mut state = self.state.write().await;
        state
            .results
            .get_mut(job_id)
            .and_then(next_scripted)
            .unwrap_or_else(|| Err(TransportError::client(404, "result not found")))
    }

    async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<JobListing>, TransportError> {
        self.check_session()?;
        let state = self.state.read().await;
        Ok(state
            .listings
            .iter()
            .filter(|listing| query.status.is_none_or(|s| s == listing.update.status))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthToken, TransportError> {
        if credentials.password != "correct-horse" {
            return Err(TransportError::client(401, "invalid credentials"));
        }
        let token = AuthToken::new(format!("token-{}", credentials.username), 3600);
        if let Some(session) = &self.session {
            session.set_token(token.clone());
        }
        Ok(token)
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if let Some(session) = &self.session {
            session.clear();
        }
        Ok(())
    }
}

/// How a scripted push subscription behaves.
#[derive(Debug, Clone)]
pub enum PushScript {
    /// Connection attempt fails outright.
    Refuse(TransportError),
    /// Emit each item after its delay, then either hang or close.
    Events {
        events: Vec<(Duration, Scripted<StatusUpdate>)>,
        hang: bool,
    },
}

impl PushScript {
    pub fn hang_after(events: Vec<(Duration, Scripted<StatusUpdate>)>) -> Self {
        PushScript::Events { events, hang: true }
    }

    pub fn close_after(events: Vec<(Duration, Scripted<StatusUpdate>)>) -> Self {
        PushScript::Events {
            events,
            hang: false,
        }
    }
}

struct ActiveStream(Arc<AtomicUsize>);

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct ScriptedPush {
    scripts: RwLock<HashMap<JobId, PushScript>>,
    pub subscribe_calls: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl ScriptedPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, job_id: &str, script: PushScript) {
        self.scripts
            .write()
            .await
            .insert(JobId::from(job_id), script);
    }

    /// Streams handed out and not yet dropped.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSource for ScriptedPush {
    async fn subscribe(
        &self,
        job_id: &JobId,
        _kind: JobKind,
    ) -> Result<StatusStream, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .read()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| PushScript::hang_after(Vec::new()));

        let (events, hang) = match script {
            PushScript::Refuse(err) => return Err(err),
            PushScript::Events { events, hang } => (events, hang),
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveStream(Arc::clone(&self.active));
        let stream = async_stream::stream! {
            let _guard = guard;
            for (delay, item) in events {
                tokio::time::sleep(delay).await;
                yield item;
            }
            if hang {
                std::future::pending::<()>().await;
            }
        };
        Ok(Box::pin(stream))
    }
}

pub fn config(poll: bool, push: bool) -> CoordinatorConfig {
    CoordinatorConfig {
        channels: ChannelConfig { poll, push },
        ..CoordinatorConfig::default()
    }
}

pub fn running(progress: u8) -> Scripted<StatusUpdate> {
    Ok(StatusUpdate::running(progress))
}

pub fn pending() -> Scripted<StatusUpdate> {
    Ok(StatusUpdate::pending())
}

pub fn completed() -> Scripted<StatusUpdate> {
    Ok(StatusUpdate::completed())
}

pub fn network_down() -> Scripted<StatusUpdate> {
    Err(TransportError::transport("connection refused"))
}

pub fn inventory(store: ResultStore) -> Scripted<JobResult> {
    Ok(JobResult::Inventory(store))
}

pub fn usd(amount: f64) -> ResourceCost {
    ResourceCost::monthly(amount, "USD")
}

/// Three Azure resources costing $100 in total.
pub fn azure_store() -> ResultStore {
    ResultStore::new(CloudProvider::Azure)
        .with_resource(
            Resource::new(CloudProvider::Azure, "vm-web", "virtual_machine", "eastus")
                .with_cost(usd(70.0)),
        )
        .with_resource(
            Resource::new(CloudProvider::Azure, "sa-logs", "storage_account", "eastus")
                .with_cost(usd(20.0)),
        )
        .with_resource(
            Resource::new(CloudProvider::Azure, "vnet-core", "virtual_network", "westeurope")
                .with_cost(usd(10.0)),
        )
}

/// Two AWS resources costing $50 in total.
pub fn aws_store() -> ResultStore {
    ResultStore::new(CloudProvider::Aws)
        .with_resource(
            Resource::new(CloudProvider::Aws, "i-0abc", "virtual_machine", "us-east-1")
                .with_cost(usd(35.0)),
        )
        .with_resource(
            Resource::new(CloudProvider::Aws, "rds-main", "database", "us-east-1")
                .with_cost(usd(15.0)),
        )
}
