use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use cloudviz_model::{
    AuthToken, Credentials, JobId, JobKind, JobListQuery, JobListing, JobRequest, JobResult,
    JobSubmission, RenderArtifact, ResultStore, StatusUpdate,
};

use super::routes::{self, v1};
use super::sse::SsePushSource;
use super::{JobBackend, TransportError};
use crate::config::{CoordinatorConfig, normalize_base_url};
use crate::error::{CoreError, Result};
use crate::session::Session;

/// JSON-over-HTTP job backend.
#[derive(Clone)]
pub struct HttpTransport {
    pub(crate) client: Client,
    base_url: String,
    api_root: String,
    session: Arc<Session>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_root", &self.api_root)
            .field("session", &self.session)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &CoordinatorConfig, session: Arc<Session>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(TransportError::from)?;

        let base_url = normalize_base_url(&config.base_url);
        url::Url::parse(&base_url)
            .map_err(|err| CoreError::Config(format!("invalid base_url {base_url}: {err}")))?;
        info!(base_url = %base_url, api_version = %config.api_version, "creating HTTP transport");

        Ok(Self {
            client,
            base_url,
            api_root: format!("/api/{}", config.api_version.trim_matches('/')),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Push source sharing this transport's client, base URL and session.
    pub fn push_source(&self) -> SsePushSource {
        SsePushSource::new(self.clone())
    }

    /// Absolute URL for a route, honouring the configured API version.
    pub fn build_url(&self, route: &str) -> String {
        if route.starts_with("http://") || route.starts_with("https://") {
            return route.to_string();
        }
        let path = match route.strip_prefix(v1::ROOT) {
            Some(rest) => format!("{}{}", self.api_root, rest),
            None => route.to_string(),
        };
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Absolute download URL for a finished render job.
    pub fn download_url(&self, job_id: &JobId) -> String {
        self.build_url(&routes::download(job_id))
    }

    /// Attach the bearer token, failing fast when there is none.
    pub(crate) fn authorized(
        &self,
        builder: RequestBuilder,
    ) -> std::result::Result<RequestBuilder, TransportError> {
        let token = self.session.bearer()?;
        Ok(builder.header(AUTHORIZATION, token.bearer()))
    }

    /// Send a request that carries the session token. A 401 means that token
    /// was rejected, so the session is invalidated.
    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, TransportError> {
        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("backend rejected the session token");
            self.session.invalidate();
            return Err(TransportError::SessionInvalid);
        }
        check_status(response).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, TransportError> {
        read_json(self.send(request).await?).await
    }
}

/// Pass successful responses through; anything else becomes an error without
/// touching the session.
async fn check_status(response: Response) -> std::result::Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}

async fn read_json<T: DeserializeOwned>(
    response: Response,
) -> std::result::Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|err| TransportError::transport(format!("unreadable response body: {err}")))
}

/// Map a non-success status to the normalized error shape.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> TransportError {
    let message = detail_message(body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    if status.is_server_error() {
        TransportError::transport(format!("{status}: {message}"))
    } else {
        TransportError::client(status.as_u16(), message)
    }
}

/// Pull `detail` or `message` out of a JSON error body, else use the raw text.
fn detail_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let from_json = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .or_else(|| value.get("message"))
                .or_else(|| value.get("error"))
                .and_then(|detail| detail.as_str().map(str::to_string))
        });
    Some(from_json.unwrap_or_else(|| trimmed.to_string()))
}

#[async_trait]
impl JobBackend for HttpTransport {
    async fn submit(
        &self,
        request: &JobRequest,
    ) -> std::result::Result<JobSubmission, TransportError> {
        let url = self.build_url(routes::submit(request.kind()));
        let builder = match request {
            JobRequest::Extraction(params) => self.client.post(&url).json(params),
            JobRequest::Render(params) => self.client.post(&url).json(params),
        };
        let submission: JobSubmission = self.execute(self.authorized(builder)?).await?;
        debug!(job_id = %submission.job_id, kind = %request.kind(), "backend accepted job");
        Ok(submission)
    }

    async fn fetch_status(
        &self,
        job_id: &JobId,
        kind: JobKind,
    ) -> std::result::Result<StatusUpdate, TransportError> {
        let url = self.build_url(&routes::status(kind, job_id));
        self.execute(self.authorized(self.client.get(&url))?).await
    }

    async fn fetch_result(
        &self,
        job_id: &JobId,
        kind: JobKind,
    ) -> std::result::Result<JobResult, TransportError> {
        let url = self.build_url(&routes::result(kind, job_id));
        let request = self.authorized(self.client.get(&url))?;
        match kind {
            JobKind::Extraction => {
                let store: ResultStore = self.execute(request).await?;
                Ok(JobResult::Inventory(store))
            }
            JobKind::Render => {
                let artifact: RenderArtifact = self.execute(request).await?;
                Ok(JobResult::Artifact(artifact))
            }
        }
    }

    async fn list_jobs(
        &self,
        query: &JobListQuery,
    ) -> std::result::Result<Vec<JobListing>, TransportError> {
        let url = self.build_url(routes::jobs(query.kind));
        let mut params = vec![("limit", query.limit.to_string())];
        if let Some(status) = query.status {
            params.push(("status_filter", status.as_str().to_string()));
        }
        let request = self.authorized(self.client.get(&url).query(&params))?;
        self.execute(request).await
    }

    async fn login(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<AuthToken, TransportError> {
        let url = self.build_url(routes::auth::LOGIN);
        // No bearer goes out here, so a 401 is about the credentials and the
        // current session stays as it is.
        let response = self.client.post(&url).json(credentials).send().await?;
        let token: AuthToken = read_json(check_status(response).await?).await?;
        info!(username = %credentials.username, expires_in = token.expires_in, "logged in");
        self.session.set_token(token.clone());
        Ok(token)
    }

    async fn logout(&self) -> std::result::Result<(), TransportError> {
        let Some(token) = self.session.token() else {
            return Ok(());
        };
        // Local state goes first so a failing call still logs the caller out.
        self.session.clear();

        let url = self.build_url(routes::auth::LOGOUT);
        let request = self.client.post(&url).header(AUTHORIZATION, token.bearer());
        match self.send(request).await {
            Ok(_) | Err(TransportError::SessionInvalid) => Ok(()),
            Err(err) => {
                warn!(error = %err, "logout call failed; local session already cleared");
                Err(err)
            }
        }
    }
}
