use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ModelError;

/// Cloud providers whose inventories can be extracted and merged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Azure,
    Aws,
    Gcp,
}

impl CloudProvider {
    pub fn all() -> &'static [Self] {
        &[CloudProvider::Azure, CloudProvider::Aws, CloudProvider::Gcp]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Azure => "azure",
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CloudProvider::Azure => "Microsoft Azure",
            CloudProvider::Aws => "Amazon Web Services",
            CloudProvider::Gcp => "Google Cloud Platform",
        }
    }
}

impl Display for CloudProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(CloudProvider::Azure),
            "aws" => Ok(CloudProvider::Aws),
            "gcp" => Ok(CloudProvider::Gcp),
            other => Err(ModelError::UnknownProvider(other.to_string())),
        }
    }
}

/// Boundary of a single extraction run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionScope {
    Subscription,
    ResourceGroup,
    Region,
    Tag,
    Organization,
    Project,
    Account,
}

impl ExtractionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionScope::Subscription => "subscription",
            ExtractionScope::ResourceGroup => "resource_group",
            ExtractionScope::Region => "region",
            ExtractionScope::Tag => "tag",
            ExtractionScope::Organization => "organization",
            ExtractionScope::Project => "project",
            ExtractionScope::Account => "account",
        }
    }
}

impl Display for ExtractionScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionScope {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subscription" => Ok(ExtractionScope::Subscription),
            "resource_group" | "resource-group" => Ok(ExtractionScope::ResourceGroup),
            "region" => Ok(ExtractionScope::Region),
            "tag" => Ok(ExtractionScope::Tag),
            "organization" => Ok(ExtractionScope::Organization),
            "project" => Ok(ExtractionScope::Project),
            "account" => Ok(ExtractionScope::Account),
            other => Err(ModelError::UnknownScope(other.to_string())),
        }
    }
}
