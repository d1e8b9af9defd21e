use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{info, warn};

use cloudviz_model::{
    AggregatedView, AuthToken, Credentials, ExtractionRequest, JobId, JobKind, JobListQuery,
    JobListing, JobRequest, JobResult, RenderArtifact, RenderRequest, ResultStore,
};

use crate::aggregator::Aggregator;
use crate::catalog::InventoryCatalog;
use crate::config::CoordinatorConfig;
use crate::coordinator::{AwaitOptions, JobCoordinator};
use crate::error::{CoreError, Result};
use crate::job::{JobOutcome, JobRecord};
use crate::session::Session;
use crate::transport::{HttpTransport, JobBackend, PushSource, TransportError};

/// Entry point for callers: submits work, hands out coordinators, and feeds
/// completed extractions into the inventory catalog.
pub struct JobOrchestrator {
    backend: Arc<dyn JobBackend>,
    push: Option<Arc<dyn PushSource>>,
    session: Arc<Session>,
    config: Arc<CoordinatorConfig>,
    catalog: Arc<InventoryCatalog>,
    tracked: DashMap<JobId, watch::Receiver<JobRecord>>,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("backend", &self.backend)
            .field("push_enabled", &self.push.is_some())
            .field("session", &self.session)
            .field("tracked_jobs", &self.tracked.len())
            .field("catalog_stores", &self.catalog.len())
            .finish()
    }
}

/// What one `extract_all` call produced.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One outcome per accepted submission, in request order.
    pub outcomes: Vec<JobOutcome>,
    /// Requests the backend refused at submission time.
    pub rejected: Vec<(ExtractionRequest, TransportError)>,
    /// Catalog view after the batch was ingested.
    pub view: Arc<AggregatedView>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }
}

impl JobOrchestrator {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        push: Option<Arc<dyn PushSource>>,
        session: Arc<Session>,
        config: CoordinatorConfig,
    ) -> Self {
        let catalog = InventoryCatalog::new(Aggregator::new(config.currency.clone()));
        Self {
            backend,
            push,
            session,
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            tracked: DashMap::new(),
        }
    }

    /// Wire up the HTTP transport and SSE push source for `config`.
    pub fn connect(config: CoordinatorConfig) -> Result<Self> {
        let config = config.normalized();
        config
            .validate()
            .map_err(|err| CoreError::Config(format!("{err:#}")))?;
        let session = Session::shared(config.session_event_capacity);
        let http = HttpTransport::new(&config, Arc::clone(&session))?;
        let push: Arc<dyn PushSource> = Arc::new(http.push_source());
        Ok(Self::new(Arc::new(http), Some(push), session, config))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<InventoryCatalog> {
        &self.catalog
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthToken> {
        Ok(self.backend.login(credentials).await?)
    }

    /// Logs out on the backend if possible; the local token is dropped either
    /// way.
    pub async fn logout(&self) -> Result<()> {
        let outcome = self.backend.logout().await;
        self.session.clear();
        Ok(outcome?)
    }

    /// Submit a job and return the coordinator that tracks it.
    pub async fn submit(&self, request: impl Into<JobRequest>) -> Result<JobCoordinator> {
        let request = request.into();
        let kind = request.kind();
        let submission = self.backend.submit(&request).await?;
        info!(
            job_id = %submission.job_id,
            kind = %kind,
            scope = %request.scope_label(),
            status = %submission.status,
            "job submitted"
        );
        let record = JobRecord::from_submission(&submission, kind);
        Ok(self.coordinator(record))
    }

    /// Coordinator for a job submitted earlier, e.g. by a previous process or
    /// a caller whose wait timed out.
    pub fn attach(&self, job_id: impl Into<JobId>, kind: JobKind) -> JobCoordinator {
        let record = JobRecord::new(job_id.into(), kind);
        info!(job_id = %record.id(), kind = %kind, "attaching to existing job");
        self.coordinator(record)
    }

    fn coordinator(&self, record: JobRecord) -> JobCoordinator {
        let coordinator = JobCoordinator::new(
            record,
            Arc::clone(&self.backend),
            self.push.clone(),
            Arc::clone(&self.session),
            Arc::clone(&self.config),
        );
        self.tracked
            .insert(coordinator.id().clone(), coordinator.watch());
        coordinator
    }

    /// Drop a coordinator the orchestrator ran itself; nobody else can
    /// observe it afterwards.
    fn untrack(&self, coordinator: JobCoordinator) {
        self.tracked.remove(coordinator.id());
    }

    /// Run one extraction to completion and add its inventory to the catalog.
    pub async fn extract(
        &self,
        request: ExtractionRequest,
        options: AwaitOptions,
    ) -> Result<ResultStore> {
        let mut coordinator = self.submit(request).await?;
        let outcome = coordinator.await_result(options).await;
        let job_id = coordinator.id().to_string();
        self.untrack(coordinator);
        match completed_result(job_id.clone(), outcome)? {
            JobResult::Inventory(store) => {
                self.catalog.ingest([store.clone()]);
                Ok(store)
            }
            JobResult::Artifact(_) => Err(CoreError::UnexpectedResult {
                job_id,
                expected: "inventory",
            }),
        }
    }

    /// Run one render job to completion and return where its output lives.
    pub async fn render(
        &self,
        request: RenderRequest,
        options: AwaitOptions,
    ) -> Result<RenderArtifact> {
        let mut coordinator = self.submit(request).await?;
        let outcome = coordinator.await_result(options).await;
        let job_id = coordinator.id().to_string();
        self.untrack(coordinator);
        match completed_result(job_id.clone(), outcome)? {
            JobResult::Artifact(artifact) => Ok(artifact),
            JobResult::Inventory(_) => Err(CoreError::UnexpectedResult {
                job_id,
                expected: "render artifact",
            }),
        }
    }

    pub async fn list_jobs(&self, query: &JobListQuery) -> Result<Vec<JobListing>> {
        Ok(self.backend.list_jobs(query).await?)
    }

    /// Latest record seen for a job this orchestrator handed out.
    pub fn snapshot(&self, job_id: &JobId) -> Option<JobRecord> {
        self.tracked
            .get(job_id)
            .map(|entry| entry.value().borrow().clone())
    }

    pub fn tracked_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.tracked.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop tracking jobs that are terminal or whose coordinator was dropped.
    ///
    /// Jobs run by `extract`, `render` and `extract_all` are untracked when
    /// they return. Coordinators from `submit` and `attach` stay tracked until
    /// this is called.
    pub fn forget_finished(&self) -> usize {
        let before = self.tracked.len();
        self.tracked.retain(|_, receiver| {
            receiver.has_changed().is_ok() && !receiver.borrow().is_terminal()
        });
        before - self.tracked.len()
    }

    /// Submit every request, wait for all of them concurrently, and feed the
    /// completed inventories into the catalog as one batch.
    pub async fn extract_all(
        &self,
        requests: Vec<ExtractionRequest>,
        options: AwaitOptions,
    ) -> BatchReport {
        let submissions = join_all(
            requests
                .into_iter()
                .map(|request| async move {
                    let submitted = self.submit(request.clone()).await;
                    (request, submitted)
                }),
        )
        .await;

        let mut coordinators = Vec::with_capacity(submissions.len());
        let mut rejected = Vec::new();
        for (request, submitted) in submissions {
            match submitted {
                Ok(coordinator) => coordinators.push(coordinator),
                Err(CoreError::Transport(err)) => {
                    warn!(
                        provider = %request.provider,
                        scope_identifier = %request.scope_identifier,
                        error = %err,
                        "extraction submit refused"
                    );
                    rejected.push((request, err));
                }
                Err(other) => {
                    warn!(error = %other, "extraction submit failed");
                    rejected.push((request, TransportError::transport(other.to_string())));
                }
            }
        }

        let outcomes = join_all(
            coordinators
                .iter_mut()
                .map(|coordinator| coordinator.await_result(options.clone())),
        )
        .await;
        for coordinator in coordinators {
            self.untrack(coordinator);
        }

        let completed: Vec<ResultStore> = outcomes
            .iter()
            .filter_map(JobOutcome::result)
            .filter_map(JobResult::inventory)
            .cloned()
            .collect();

        let view = if completed.is_empty() {
            self.catalog.view()
        } else {
            self.catalog.ingest(completed)
        };

        info!(
            submitted = outcomes.len(),
            rejected = rejected.len(),
            completed = outcomes.iter().filter(|o| o.is_completed()).count(),
            "extraction batch finished"
        );

        BatchReport {
            outcomes,
            rejected,
            view,
        }
    }
}

fn completed_result(job_id: String, outcome: JobOutcome) -> Result<JobResult> {
    let label = outcome.label();
    let failure = outcome.failure().cloned();
    outcome.into_result().ok_or(CoreError::Incomplete {
        job_id,
        outcome: label,
        failure,
    })
}
