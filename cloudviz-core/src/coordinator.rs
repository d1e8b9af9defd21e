//! Tracks one job to its terminal state over two racing channels.
//!
//! A coordinator owns its [`JobRecord`] and the poller/push tasks it starts.
//! Both channels feed a single mpsc queue; the coordinator is the only writer
//! of the record, so the first terminal status to come off the queue wins and
//! anything after it is discarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use cloudviz_model::{JobId, JobKind, JobResult, JobStatus};

use crate::channel::{ChannelExit, ChannelKind, ChannelMessage};
use crate::config::CoordinatorConfig;
use crate::job::{Applied, JobFailure, JobOutcome, JobRecord};
use crate::poller::Poller;
use crate::push::PushChannel;
use crate::session::{Session, SessionEvent};
use crate::transport::{JobBackend, PushSource, TransportError};

/// Per-call knobs for [`JobCoordinator::await_result`].
#[derive(Debug, Clone, Default)]
pub struct AwaitOptions {
    /// Overrides the configured default deadline.
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl AwaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

#[derive(Debug)]
enum ResultStop {
    Interrupted(Interrupt),
    Failed(JobFailure),
}

type ChannelTasks = JoinSet<(ChannelKind, ChannelExit)>;

#[derive(Debug)]
pub struct JobCoordinator {
    record: JobRecord,
    backend: Arc<dyn JobBackend>,
    push: Option<Arc<dyn PushSource>>,
    session: Arc<Session>,
    config: Arc<CoordinatorConfig>,
    outcome: Option<JobOutcome>,
    snapshots: watch::Sender<JobRecord>,
}

impl JobCoordinator {
    pub fn new(
        record: JobRecord,
        backend: Arc<dyn JobBackend>,
        push: Option<Arc<dyn PushSource>>,
        session: Arc<Session>,
        config: Arc<CoordinatorConfig>,
    ) -> Self {
        let (snapshots, _) = watch::channel(record.clone());
        Self {
            record,
            backend,
            push,
            session,
            config,
            outcome: None,
            snapshots,
        }
    }

    pub fn id(&self) -> &JobId {
        self.record.id()
    }

    pub fn kind(&self) -> JobKind {
        self.record.kind()
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Final outcome, once a wait has produced one.
    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    /// Receives a copy of the record after every accepted write.
    pub fn watch(&self) -> watch::Receiver<JobRecord> {
        self.snapshots.subscribe()
    }

    /// Wait until the job is COMPLETED (and its result fetched) or FAILED, or
    /// until the caller cancels or the deadline passes.
    ///
    /// Both channels are stopped and joined before this returns. Completed and
    /// failed outcomes are cached; a cancelled or timed-out wait can simply be
    /// repeated.
    pub async fn await_result(&mut self, options: AwaitOptions) -> JobOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let cancel = options.cancel.unwrap_or_default();
        let expires = options
            .deadline
            .or_else(|| self.config.default_deadline())
            .map(|deadline| Instant::now() + deadline);
        let span = info_span!("job", job_id = %self.record.id(), kind = %self.record.kind());

        self.run(cancel, expires).instrument(span).await
    }

    async fn run(&mut self, cancel: CancellationToken, expires: Option<Instant>) -> JobOutcome {
        if !self.record.is_terminal()
            && let Some(interrupt) = self.track(&cancel, expires).await
        {
            return self.interrupted(interrupt);
        }

        let outcome = match self.record.status() {
            JobStatus::Completed => match self.fetch_result(&cancel, expires).await {
                Ok(result) => JobOutcome::Completed {
                    record: self.record.clone(),
                    result,
                },
                Err(ResultStop::Interrupted(interrupt)) => return self.interrupted(interrupt),
                Err(ResultStop::Failed(failure)) => {
                    error!(error = %failure, "job completed but its result could not be fetched");
                    return JobOutcome::Failed {
                        record: self.record.clone(),
                        failure,
                    };
                }
            },
            _ => {
                let failure = self.record.failure().cloned().unwrap_or_else(|| {
                    JobFailure::BackendFailure {
                        message: self.record.error().unwrap_or("job failed").to_string(),
                    }
                });
                JobOutcome::Failed {
                    record: self.record.clone(),
                    failure,
                }
            }
        };

        info!(outcome = outcome.label(), "job finished");
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn interrupted(&self, interrupt: Interrupt) -> JobOutcome {
        let record = self.record.clone();
        match interrupt {
            Interrupt::Cancelled => {
                info!(status = %record.status(), "wait cancelled by caller");
                JobOutcome::Cancelled { record }
            }
            Interrupt::TimedOut => {
                info!(status = %record.status(), "wait deadline expired");
                JobOutcome::TimedOut { record }
            }
        }
    }

    /// Run the channels until the record turns terminal or the wait is
    /// interrupted. Returns `None` in the first case.
    async fn track(
        &mut self,
        cancel: &CancellationToken,
        expires: Option<Instant>,
    ) -> Option<Interrupt> {
        let (tx, mut rx) = mpsc::channel(self.config.update_buffer.max(1));
        let channels = cancel.child_token();
        let mut tasks = ChannelTasks::new();

        let mut push_token = match (&self.push, self.config.channels.push) {
            (Some(source), true) => Some(self.spawn_push(&mut tasks, source, &tx, &channels)),
            _ => None,
        };
        let mut polling = false;
        if self.config.channels.poll || push_token.is_none() {
            self.spawn_poller(&mut tasks, &tx, &channels);
            polling = true;
        }

        let mut session_events = self.session.subscribe();
        let mut session_open = true;
        let deadline = wait_until(expires);
        tokio::pin!(deadline);

        let interrupted = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(Interrupt::Cancelled),
                _ = &mut deadline => break Some(Interrupt::TimedOut),
                Some(message) = rx.recv() => match message {
                    ChannelMessage::Update { source, update } => {
                        match self.record.apply(&update, source) {
                            Applied::Terminal => {
                                self.publish();
                                info!(
                                    source = %source,
                                    status = %update.status,
                                    "terminal status accepted"
                                );
                                break None;
                            }
                            Applied::Updated => {
                                self.publish();
                                debug!(
                                    source = %source,
                                    status = %self.record.status(),
                                    progress = self.record.progress(),
                                    "status updated"
                                );
                            }
                            Applied::Discarded => {}
                        }
                    }
                    ChannelMessage::PollFailed(failure) => {
                        if self.record.fail_locally(failure) == Applied::Terminal {
                            self.publish();
                        }
                        break None;
                    }
                    ChannelMessage::PushLost { error } => {
                        push_token = None;
                        match &error {
                            Some(err) => info!(
                                error = %err,
                                "push channel lost, falling back to polling"
                            ),
                            None => info!("push channel closed, falling back to polling"),
                        }
                        if !polling {
                            self.spawn_poller(&mut tasks, &tx, &channels);
                            polling = true;
                        }
                    }
                },
                event = session_events.recv(), if session_open => match event {
                    Ok(SessionEvent::Invalidated) | Ok(SessionEvent::LoggedOut) => {
                        info!("session ended; dropping push channel");
                        if let Some(token) = push_token.take() {
                            token.cancel();
                        }
                        if !polling {
                            self.spawn_poller(&mut tasks, &tx, &channels);
                            polling = true;
                        }
                    }
                    Ok(SessionEvent::LoggedIn) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session events lagged");
                    }
                    Err(RecvError::Closed) => session_open = false,
                },
            }
        };

        channels.cancel();
        drop(rx);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, exit)) => debug!(channel = %kind, exit = ?exit, "channel stopped"),
                Err(err) => warn!(error = %err, "channel task aborted"),
            }
        }

        interrupted
    }

    fn spawn_poller(
        &self,
        tasks: &mut ChannelTasks,
        tx: &mpsc::Sender<ChannelMessage>,
        parent: &CancellationToken,
    ) {
        let poller = Poller::new(
            Arc::clone(&self.backend),
            self.record.id().clone(),
            self.record.kind(),
            &self.config,
        );
        let token = parent.child_token();
        let tx = tx.clone();
        debug!("starting poller");
        tasks.spawn(
            async move { (ChannelKind::Poll, poller.run(tx, token).await) }.in_current_span(),
        );
    }

    fn spawn_push(
        &self,
        tasks: &mut ChannelTasks,
        source: &Arc<dyn PushSource>,
        tx: &mpsc::Sender<ChannelMessage>,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let channel = PushChannel::new(
            Arc::clone(source),
            self.record.id().clone(),
            self.record.kind(),
        );
        let token = parent.child_token();
        let task_token = token.clone();
        let tx = tx.clone();
        debug!("starting push channel");
        tasks.spawn(
            async move { (ChannelKind::Push, channel.run(tx, task_token).await) }
                .in_current_span(),
        );
        token
    }

    /// Fetch the result of a COMPLETED job, retrying transport failures at the
    /// poll cadence within the same failure budget as polling.
    async fn fetch_result(
        &self,
        cancel: &CancellationToken,
        expires: Option<Instant>,
    ) -> Result<JobResult, ResultStop> {
        let budget = self.config.max_consecutive_failures.max(1);
        let deadline = wait_until(expires);
        tokio::pin!(deadline);
        let mut attempts: u32 = 0;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResultStop::Interrupted(Interrupt::Cancelled)),
                _ = &mut deadline => return Err(ResultStop::Interrupted(Interrupt::TimedOut)),
                fetched = self.backend.fetch_result(self.record.id(), self.record.kind()) => {
                    fetched
                }
            };

            match fetched {
                Ok(result) => return Ok(result),
                Err(TransportError::SessionInvalid) => {
                    return Err(ResultStop::Failed(JobFailure::SessionInvalid));
                }
                Err(TransportError::Client { status, message }) => {
                    return Err(ResultStop::Failed(JobFailure::Rejected { status, message }));
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= budget {
                        return Err(ResultStop::Failed(JobFailure::TransportExhausted {
                            attempts,
                            last_error: err.to_string(),
                        }));
                    }
                    warn!(attempt = attempts, error = %err, "result fetch failed, retrying");
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResultStop::Interrupted(Interrupt::Cancelled)),
                _ = &mut deadline => return Err(ResultStop::Interrupted(Interrupt::TimedOut)),
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.record.clone());
    }
}

async fn wait_until(expires: Option<Instant>) {
    match expires {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
