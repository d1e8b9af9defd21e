use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Which update channels a coordinator starts for a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub poll: bool,
    pub push: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll: true,
            push: true,
        }
    }
}

/// Runtime knobs for job tracking and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Backend root, e.g. `http://localhost:8000`. A missing scheme is
    /// filled in with `http://`.
    pub base_url: String,
    pub api_version: String,
    pub request_timeout_ms: u64,
    /// Fixed poll cadence. There is no backoff on top of it.
    pub poll_interval_ms: u64,
    /// Consecutive retryable poll failures tolerated before the job is failed
    /// locally as transport-exhausted.
    pub max_consecutive_failures: u32,
    pub channels: ChannelConfig,
    /// Applied by `await_result` when the caller passes no deadline.
    pub default_deadline_ms: Option<u64>,
    pub session_event_capacity: usize,
    /// Bound of the channel carrying updates from poller and push to the
    /// coordinator.
    pub update_buffer: usize,
    /// Currency the aggregated view totals are expressed in.
    pub currency: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_version: "v1".to_string(),
            request_timeout_ms: 30_000,
            poll_interval_ms: 2_000,
            max_consecutive_failures: 5,
            channels: ChannelConfig::default(),
            default_deadline_ms: None,
            session_event_capacity: 16,
            update_buffer: 64,
            currency: "USD".to_string(),
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
    Default,
}

impl CoordinatorConfig {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `.env` in the working directory (if present),
    /// 2) `$CLOUDVIZ_CONFIG_PATH` (TOML or JSON file),
    /// 3) `$CLOUDVIZ_CONFIG_JSON` (inline JSON),
    /// 4) the first existing default file candidate,
    /// 5) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        let _ = dotenvy::dotenv();

        let (config, source) = Self::resolve()?;
        let config = config.normalized();
        config.validate()?;
        Ok((config, source))
    }

    fn resolve() -> anyhow::Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var("CLOUDVIZ_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("CLOUDVIZ_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed =
                Self::parse_json(&raw).context("failed to parse CLOUDVIZ_CONFIG_JSON")?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read cloudviz config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid cloudviz config {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid cloudviz config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse cloudviz config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid cloudviz config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "cloudviz.toml",
            "cloudviz.json",
            "config/cloudviz.toml",
            "config/cloudviz.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.max_consecutive_failures == 0 {
            bail!("max_consecutive_failures must be greater than zero");
        }
        if !self.channels.poll && !self.channels.push {
            bail!("at least one of channels.poll or channels.push must be enabled");
        }
        if self.update_buffer == 0 || self.session_event_capacity == 0 {
            bail!("update_buffer and session_event_capacity must be greater than zero");
        }
        if self.currency.trim().is_empty() {
            bail!("currency must not be empty");
        }
        let base = normalize_base_url(&self.base_url);
        url::Url::parse(&base).with_context(|| format!("invalid base_url {base}"))?;
        Ok(())
    }

    pub fn normalized(mut self) -> Self {
        self.base_url = normalize_base_url(&self.base_url);
        self.currency = self.currency.trim().to_ascii_uppercase();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }
}

/// Add `http://` when no scheme is given and drop trailing slashes, so
/// `localhost:8000/` and `http://localhost:8000` end up identical.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    if with_scheme != raw {
        tracing::debug!(from = raw, to = %with_scheme, "normalized backend base URL");
    }
    with_scheme
}
