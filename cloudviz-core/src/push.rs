use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cloudviz_model::{JobId, JobKind};

use crate::channel::{ChannelExit, ChannelMessage};
use crate::job::UpdateSource;
use crate::transport::PushSource;

/// Forwards one job's push subscription to its coordinator.
///
/// Any connection problem is reported once as [`ChannelMessage::PushLost`]
/// and the task ends; reconnecting is not its job.
#[derive(Debug)]
pub struct PushChannel {
    source: Arc<dyn PushSource>,
    job_id: JobId,
    kind: JobKind,
}

impl PushChannel {
    pub fn new(source: Arc<dyn PushSource>, job_id: JobId, kind: JobKind) -> Self {
        Self {
            source,
            job_id,
            kind,
        }
    }

    pub async fn run(
        self,
        updates: mpsc::Sender<ChannelMessage>,
        cancel: CancellationToken,
    ) -> ChannelExit {
        let subscribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ChannelExit::Cancelled,
            subscribed = self.source.subscribe(&self.job_id, self.kind) => subscribed,
        };

        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(err) => {
                info!(error = %err, "push subscription failed");
                return report_lost(&updates, Some(err)).await;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChannelExit::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(update)) => {
                    let terminal = update.status.is_terminal();
                    debug!(status = %update.status, progress = update.progress, "push update");
                    let message = ChannelMessage::Update {
                        source: UpdateSource::Push,
                        update,
                    };
                    if updates.send(message).await.is_err() {
                        return ChannelExit::Closed;
                    }
                    if terminal {
                        return ChannelExit::Terminal;
                    }
                }
                Some(Err(err)) => {
                    info!(error = %err, "push connection lost");
                    return report_lost(&updates, Some(err)).await;
                }
                None => {
                    info!("push stream closed before a terminal status");
                    return report_lost(&updates, None).await;
                }
            }
        }
    }
}

async fn report_lost(
    updates: &mpsc::Sender<ChannelMessage>,
    error: Option<crate::transport::TransportError>,
) -> ChannelExit {
    match updates.send(ChannelMessage::PushLost { error }).await {
        Ok(()) => ChannelExit::Failed,
        Err(_) => ChannelExit::Closed,
    }
}
