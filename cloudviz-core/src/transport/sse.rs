use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource, retry};
use tracing::{debug, warn};

use cloudviz_model::{JobId, JobKind, JobStatus, StatusUpdate};

use super::http::{HttpTransport, error_for_status};
use super::routes;
use super::{PushSource, StatusStream, TransportError};

/// Server-sent-events subscription to `/jobs/{id}/events`.
///
/// Reconnection is disabled: the first connection error is yielded once and
/// the stream ends, leaving recovery to the coordinator.
#[derive(Clone)]
pub struct SsePushSource {
    http: HttpTransport,
}

impl fmt::Debug for SsePushSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsePushSource")
            .field("base_url", &self.http.base_url())
            .finish()
    }
}

impl SsePushSource {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PushSource for SsePushSource {
    async fn subscribe(
        &self,
        job_id: &JobId,
        kind: JobKind,
    ) -> Result<StatusStream, TransportError> {
        let url = self.http.build_url(&routes::events(kind, job_id));
        let request = self.http.authorized(self.http.client.get(&url))?;

        let mut source = EventSource::new(request)
            .map_err(|err| TransportError::transport(format!("cannot open event stream: {err}")))?;
        source.set_retry_policy(Box::new(retry::Never));

        let session = self.http.session().clone();
        let job_id = job_id.clone();
        debug!(job_id = %job_id, url = %url, "opening push subscription");

        let stream = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {
                        debug!(job_id = %job_id, "push subscription open");
                    }
                    Ok(Event::Message(message)) => {
                        let Some(update) = decode_event(&message.event, &message.data) else {
                            continue;
                        };
                        let terminal = update.status.is_terminal();
                        yield Ok(update);
                        if terminal {
                            break;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => {
                        debug!(job_id = %job_id, "push stream ended by server");
                        break;
                    }
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let err = if status == StatusCode::UNAUTHORIZED {
                            session.invalidate();
                            TransportError::SessionInvalid
                        } else {
                            let body = response.text().await.unwrap_or_default();
                            error_for_status(status, &body)
                        };
                        yield Err(err);
                        break;
                    }
                    Err(other) => {
                        yield Err(TransportError::transport(other.to_string()));
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}

/// Turn one SSE frame into a status update.
///
/// Keepalives and unknown events are skipped. `complete` and `error` frames
/// may carry a full status payload or just a message.
pub(crate) fn decode_event(event: &str, data: &str) -> Option<StatusUpdate> {
    let data = data.trim();
    if data.is_empty() || data == "keepalive" {
        return None;
    }

    let parsed = serde_json::from_str::<StatusUpdate>(data);
    match event {
        "" | "message" | "status" | "progress" => match parsed {
            Ok(update) => Some(update),
            Err(err) => {
                warn!(error = %err, data, "discarding malformed push event");
                None
            }
        },
        "complete" => Some(match parsed {
            Ok(update) => StatusUpdate {
                status: JobStatus::Completed,
                progress: 100,
                ..update
            },
            Err(_) => StatusUpdate::completed().with_message(data),
        }),
        "error" => Some(match parsed {
            Ok(update) => StatusUpdate {
                status: JobStatus::Failed,
                error: update
                    .error
                    .clone()
                    .or_else(|| update.message.clone())
                    .or_else(|| Some("job failed".to_string())),
                ..update
            },
            Err(_) => StatusUpdate::failed(data),
        }),
        other => {
            debug!(event = other, "ignoring unknown push event");
            None
        }
    }
}
