use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::provider::CloudProvider;

/// Buckets used for the cost breakdown of the aggregated view.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CostCategory {
    Compute,
    Storage,
    Networking,
    Database,
    Other,
}

impl CostCategory {
    pub fn all() -> &'static [Self] {
        &[
            CostCategory::Compute,
            CostCategory::Storage,
            CostCategory::Networking,
            CostCategory::Database,
            CostCategory::Other,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Compute => "compute",
            CostCategory::Storage => "storage",
            CostCategory::Networking => "networking",
            CostCategory::Database => "database",
            CostCategory::Other => "other",
        }
    }

    /// Best-effort category for a provider resource type, used when a cost
    /// arrives without its own breakdown.
    pub fn for_resource_type(resource_type: &str) -> Self {
        let normalized = resource_type.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "virtual_machine" | "container_instance" | "kubernetes_cluster"
            | "serverless_function" => CostCategory::Compute,
            "storage_account" | "blob_storage" | "object_storage" | "cache" => {
                CostCategory::Storage
            }
            "database" => CostCategory::Database,
            "virtual_network" | "subnet" | "load_balancer" | "application_gateway"
            | "vpn_gateway" => CostCategory::Networking,
            _ => CostCategory::Other,
        }
    }
}

impl Display for CostCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostCategory {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CostCategory::all()
            .iter()
            .copied()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownCostCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCost {
    pub monthly_amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdown: BTreeMap<CostCategory, f64>,
}

impl ResourceCost {
    pub fn monthly(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            monthly_amount: amount,
            currency: currency.into(),
            breakdown: BTreeMap::new(),
        }
    }

    pub fn with_breakdown(mut self, category: CostCategory, amount: f64) -> Self {
        *self.breakdown.entry(category).or_insert(0.0) += amount;
        self
    }
}

/// One discovered cloud resource. `id` is only unique inside the namespace of
/// its `provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub provider: CloudProvider,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub region: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<ResourceCost>,
}

impl Resource {
    pub fn new(
        provider: CloudProvider,
        id: impl Into<String>,
        resource_type: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            resource_type: resource_type.into(),
            name: None,
            region: region.into(),
            tags: BTreeMap::new(),
            properties: BTreeMap::new(),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: ResourceCost) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> EndpointRef {
        EndpointRef::new(self.provider, self.id.clone())
    }

    /// Display name preference: `DisplayName` tag, `Name` tag, name, id.
    pub fn display_name(&self) -> &str {
        self.tags
            .get("DisplayName")
            .or_else(|| self.tags.get("Name"))
            .map(String::as_str)
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn category(&self) -> CostCategory {
        CostCategory::for_resource_type(&self.resource_type)
    }
}

/// A fully qualified resource identity: provider namespace plus id.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EndpointRef {
    pub provider: CloudProvider,
    pub id: String,
}

impl EndpointRef {
    pub fn new(provider: CloudProvider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }
}

impl Display for EndpointRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

/// Directed edge between two resources.
///
/// An endpoint without an explicit provider lives in the namespace of the
/// Result Store that carries the relationship. Cross-provider edges must name
/// the provider of the foreign endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_provider: Option<CloudProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_provider: Option<CloudProvider>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type: relationship_type.into(),
            source_provider: None,
            target_provider: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn to_provider(mut self, provider: CloudProvider) -> Self {
        self.target_provider = Some(provider);
        self
    }

    pub fn from_provider(mut self, provider: CloudProvider) -> Self {
        self.source_provider = Some(provider);
        self
    }

    /// Resolve both endpoints against the namespace of the owning store.
    pub fn endpoints(&self, owner: CloudProvider) -> (EndpointRef, EndpointRef) {
        (
            EndpointRef::new(self.source_provider.unwrap_or(owner), self.source_id.clone()),
            EndpointRef::new(self.target_provider.unwrap_or(owner), self.target_id.clone()),
        )
    }
}
