use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provider::CloudProvider;
use crate::resource::{CostCategory, EndpointRef, Relationship, Resource};

/// Per-provider slice of the aggregated view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub resource_count: usize,
    pub region_count: usize,
    pub monthly_cost: f64,
}

/// Non-fatal issue found while merging Result Stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeWarning {
    /// A relationship referenced an endpoint absent from the merged union.
    DanglingRelationship {
        source: EndpointRef,
        target: EndpointRef,
        relationship_type: String,
        missing: Vec<EndpointRef>,
    },
    /// The same provider+id appeared in more than one store; one copy was kept.
    DuplicateResource { resource: EndpointRef },
    /// A store tagged with one provider carried a resource of another.
    ProviderMismatch {
        resource: EndpointRef,
        store_provider: CloudProvider,
    },
    /// Cost reported in a currency other than the view's; left out of totals.
    CurrencyMismatch {
        resource: EndpointRef,
        currency: String,
        expected: String,
    },
}

impl MergeWarning {
    pub fn is_dangling_relationship(&self) -> bool {
        matches!(self, MergeWarning::DanglingRelationship { .. })
    }
}

/// Cross-provider merge of one or more completed Result Stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedView {
    pub currency: String,
    pub providers: BTreeMap<CloudProvider, ProviderSummary>,
    pub total_resources: usize,
    pub total_relationships: usize,
    pub total_monthly_cost: f64,
    pub region_count: usize,
    pub cost_by_category: BTreeMap<CostCategory, f64>,
    pub resources_by_type: BTreeMap<String, usize>,
    pub resources_by_region: BTreeMap<String, usize>,
    pub resources: Vec<Resource>,
    pub relationships: Vec<Relationship>,
    pub warnings: Vec<MergeWarning>,
    /// Number of Result Stores that fed this view.
    pub source_count: usize,
}

impl AggregatedView {
    pub fn empty(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            providers: BTreeMap::new(),
            total_resources: 0,
            total_relationships: 0,
            total_monthly_cost: 0.0,
            region_count: 0,
            cost_by_category: CostCategory::all().iter().map(|c| (*c, 0.0)).collect(),
            resources_by_type: BTreeMap::new(),
            resources_by_region: BTreeMap::new(),
            resources: Vec::new(),
            relationships: Vec::new(),
            warnings: Vec::new(),
            source_count: 0,
        }
    }

    pub fn provider(&self, provider: CloudProvider) -> Option<&ProviderSummary> {
        self.providers.get(&provider)
    }

    pub fn category_cost(&self, category: CostCategory) -> f64 {
        self.cost_by_category.get(&category).copied().unwrap_or(0.0)
    }

    /// Lookup by provider+id. `resources` is kept sorted on that key.
    pub fn resource(&self, endpoint: &EndpointRef) -> Option<&Resource> {
        let key = (endpoint.provider, endpoint.id.as_str());
        self.resources
            .binary_search_by(|r| (r.provider, r.id.as_str()).cmp(&key))
            .ok()
            .map(|idx| &self.resources[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.total_resources == 0
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
