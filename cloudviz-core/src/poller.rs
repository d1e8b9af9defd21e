use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use cloudviz_model::{JobId, JobKind};

use crate::channel::{ChannelExit, ChannelMessage};
use crate::config::CoordinatorConfig;
use crate::job::{JobFailure, UpdateSource};
use crate::transport::{JobBackend, TransportError};

/// Fetches job status on a fixed cadence until the job is terminal, the
/// token is cancelled, or the consecutive-failure budget runs out.
#[derive(Debug)]
pub struct Poller {
    backend: Arc<dyn JobBackend>,
    job_id: JobId,
    kind: JobKind,
    interval: Duration,
    max_consecutive_failures: u32,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        job_id: JobId,
        kind: JobKind,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            backend,
            job_id,
            kind,
            interval: config.poll_interval(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
        }
    }

    /// The first fetch happens immediately; later ones follow the interval.
    /// A slow fetch delays the next tick instead of bunching ticks up.
    pub async fn run(
        self,
        updates: mpsc::Sender<ChannelMessage>,
        cancel: CancellationToken,
    ) -> ChannelExit {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChannelExit::Cancelled,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChannelExit::Cancelled,
                fetched = self.backend.fetch_status(&self.job_id, self.kind) => fetched,
            };

            let failure = match fetched {
                Ok(update) => {
                    failures = 0;
                    let terminal = update.status.is_terminal();
                    debug!(status = %update.status, progress = update.progress, "poll update");
                    let message = ChannelMessage::Update {
                        source: UpdateSource::Poll,
                        update,
                    };
                    if updates.send(message).await.is_err() {
                        return ChannelExit::Closed;
                    }
                    if terminal {
                        return ChannelExit::Terminal;
                    }
                    continue;
                }
                Err(TransportError::SessionInvalid) => {
                    warn!("status fetch refused: session invalid");
                    JobFailure::SessionInvalid
                }
                Err(TransportError::Client { status, message }) => {
                    warn!(status, message = %message, "status fetch rejected");
                    JobFailure::Rejected { status, message }
                }
                Err(err) => {
                    failures += 1;
                    if failures < self.max_consecutive_failures {
                        warn!(attempt = failures, error = %err, "status fetch failed, retrying");
                        continue;
                    }
                    error!(attempt = failures, error = %err, "status fetch budget exhausted");
                    JobFailure::TransportExhausted {
                        attempts: failures,
                        last_error: err.to_string(),
                    }
                }
            };

            return match updates.send(ChannelMessage::PollFailed(failure)).await {
                Ok(()) => ChannelExit::Failed,
                Err(_) => ChannelExit::Closed,
            };
        }
    }
}
