use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::JobId;
use crate::inventory::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mermaid,
    Graphviz,
    Dot,
    Png,
    Svg,
    Pdf,
    #[serde(alias = "jpeg")]
    Jpg,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mermaid => "mermaid",
            OutputFormat::Graphviz => "graphviz",
            OutputFormat::Dot => "dot",
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Jpg => "jpg",
        }
    }

    /// Raster and document formats travel base64-encoded.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            OutputFormat::Png | OutputFormat::Pdf | OutputFormat::Jpg
        )
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mermaid => "text/plain",
            OutputFormat::Graphviz | OutputFormat::Dot => "text/vnd.graphviz",
            OutputFormat::Png => "image/png",
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Jpg => "image/jpeg",
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mermaid" => Ok(OutputFormat::Mermaid),
            "graphviz" => Ok(OutputFormat::Graphviz),
            "dot" => Ok(OutputFormat::Dot),
            "png" => Ok(OutputFormat::Png),
            "svg" => Ok(OutputFormat::Svg),
            "pdf" => Ok(OutputFormat::Pdf),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            other => Err(ModelError::UnknownFormat(other.to_string())),
        }
    }
}

/// What a render job draws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventorySource {
    /// Results of extraction jobs the backend still holds.
    Jobs(Vec<JobId>),
    /// An inventory shipped along with the request.
    Inline(Box<ResultStore>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub inventory: InventorySource,
    pub format: OutputFormat,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, serde_json::Value>,
}

fn default_theme() -> String {
    "professional".to_string()
}

fn default_layout() -> String {
    "hierarchical".to_string()
}

impl RenderRequest {
    pub fn new(inventory: InventorySource, format: OutputFormat) -> Self {
        Self {
            inventory,
            format,
            theme: default_theme(),
            layout: default_layout(),
            options: BTreeMap::new(),
        }
    }
}

/// Reference to a rendered diagram; the bytes stay with the backend unless
/// it chose to inline them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderArtifact {
    pub format: OutputFormat,
    /// Download URL or storage key.
    pub location: String,
    pub content_type: String,
    /// `utf-8` for text formats, `base64` for binary ones.
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl RenderArtifact {
    pub fn new(format: OutputFormat, location: impl Into<String>) -> Self {
        Self {
            format,
            location: location.into(),
            content_type: format.content_type().to_string(),
            encoding: if format.is_binary() { "base64" } else { "utf-8" }.to_string(),
            content: None,
        }
    }
}
