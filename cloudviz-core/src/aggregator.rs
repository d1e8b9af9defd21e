//! Cross-provider merge of completed Result Stores.
//!
//! Every input is first keyed on provider+id (and relationships on their
//! resolved endpoints) in ordered maps; all counting and cost summation then
//! walks those maps. The view therefore does not depend on the order in which
//! stores were handed in, down to the bits of the floating-point totals.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use cloudviz_model::{
    AggregatedView, CloudProvider, CostCategory, EndpointRef, MergeWarning, Relationship,
    Resource, ResultStore,
};

/// Remainders smaller than this are treated as rounding noise when a cost
/// breakdown does not add up to the monthly amount.
const COST_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregator {
    currency: String,
}

struct Candidate<'a> {
    resource: &'a Resource,
    extraction_time: DateTime<Utc>,
    canonical: String,
}

impl Candidate<'_> {
    fn outranks(&self, other: &Candidate<'_>) -> bool {
        (self.extraction_time, &self.canonical) > (other.extraction_time, &other.canonical)
    }
}

type RelationshipKey = (EndpointRef, EndpointRef, String, String);

impl Aggregator {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into().trim().to_ascii_uppercase(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Build a fresh view from `stores`. Never fails: anything that cannot be
    /// merged is left out and recorded in `warnings`.
    pub fn merge<'a, I>(&self, stores: I) -> AggregatedView
    where
        I: IntoIterator<Item = &'a ResultStore>,
    {
        let stores: Vec<&ResultStore> = stores.into_iter().collect();
        let mut warnings = BTreeSet::new();
        let mut view = AggregatedView::empty(self.currency.clone());
        view.source_count = stores.len();

        for store in &stores {
            view.providers.entry(store.provider).or_default();
        }

        let resources = self.union_resources(&stores, &mut warnings);
        let relationships = self.resolve_relationships(&stores, &resources, &mut warnings);

        let mut regions_by_provider: BTreeMap<CloudProvider, BTreeSet<&str>> = BTreeMap::new();
        for (endpoint, candidate) in &resources {
            let resource = candidate.resource;
            let summary = view.providers.entry(endpoint.provider).or_default();
            summary.resource_count += 1;
            regions_by_provider
                .entry(endpoint.provider)
                .or_default()
                .insert(resource.region.as_str());

            *view
                .resources_by_type
                .entry(resource.resource_type.clone())
                .or_insert(0) += 1;
            *view
                .resources_by_region
                .entry(resource.region.clone())
                .or_insert(0) += 1;

            if let Some(cost) = &resource.cost {
                if !cost.currency.trim().eq_ignore_ascii_case(&self.currency) {
                    warnings.insert(MergeWarning::CurrencyMismatch {
                        resource: endpoint.clone(),
                        currency: cost.currency.clone(),
                        expected: self.currency.clone(),
                    });
                } else {
                    summary.monthly_cost += cost.monthly_amount;
                    view.total_monthly_cost += cost.monthly_amount;
                    attribute_cost(&mut view.cost_by_category, resource);
                }
            }
        }

        for (provider, regions) in regions_by_provider {
            if let Some(summary) = view.providers.get_mut(&provider) {
                summary.region_count = regions.len();
            }
        }

        view.region_count = view.resources_by_region.len();
        view.total_resources = resources.len();
        view.resources = resources
            .into_values()
            .map(|candidate| candidate.resource.clone())
            .collect();
        view.total_relationships = relationships.len();
        view.relationships = relationships.into_values().collect();
        view.warnings = warnings.into_iter().collect();

        if view.has_warnings() {
            warn!(
                warnings = view.warnings.len(),
                sources = view.source_count,
                "inventory merged with warnings"
            );
        }
        debug!(
            resources = view.total_resources,
            relationships = view.total_relationships,
            monthly_cost = view.total_monthly_cost,
            "inventory merged"
        );

        view
    }

    /// Union by provider namespace. A provider+id seen more than once keeps
    /// the copy from the most recent extraction, ties broken by content.
    fn union_resources<'a>(
        &self,
        stores: &[&'a ResultStore],
        warnings: &mut BTreeSet<MergeWarning>,
    ) -> BTreeMap<EndpointRef, Candidate<'a>> {
        let mut resources: BTreeMap<EndpointRef, Candidate<'a>> = BTreeMap::new();

        for store in stores {
            for resource in &store.resources {
                let endpoint = resource.endpoint();
                if resource.provider != store.provider {
                    warnings.insert(MergeWarning::ProviderMismatch {
                        resource: endpoint,
                        store_provider: store.provider,
                    });
                    continue;
                }

                let candidate = Candidate {
                    resource,
                    extraction_time: store.extraction_time,
                    canonical: serde_json::to_string(resource).unwrap_or_default(),
                };
                match resources.get_mut(&endpoint) {
                    Some(existing) => {
                        warnings.insert(MergeWarning::DuplicateResource {
                            resource: endpoint,
                        });
                        if candidate.outranks(existing) {
                            *existing = candidate;
                        }
                    }
                    None => {
                        resources.insert(endpoint, candidate);
                    }
                }
            }
        }

        resources
    }

    /// Keep relationships whose endpoints both survived the union. Kept
    /// edges get both providers filled in so the view stands on its own.
    fn resolve_relationships(
        &self,
        stores: &[&ResultStore],
        resources: &BTreeMap<EndpointRef, Candidate<'_>>,
        warnings: &mut BTreeSet<MergeWarning>,
    ) -> BTreeMap<RelationshipKey, Relationship> {
        let mut kept = BTreeMap::new();

        for store in stores {
            for relationship in &store.relationships {
                let (source, target) = relationship.endpoints(store.provider);
                let missing: Vec<EndpointRef> = [&source, &target]
                    .into_iter()
                    .filter(|endpoint| !resources.contains_key(*endpoint))
                    .cloned()
                    .collect();

                if !missing.is_empty() {
                    warnings.insert(MergeWarning::DanglingRelationship {
                        source,
                        target,
                        relationship_type: relationship.relationship_type.clone(),
                        missing,
                    });
                    continue;
                }

                let mut resolved = relationship.clone();
                resolved.source_provider = Some(source.provider);
                resolved.target_provider = Some(target.provider);
                let properties = serde_json::to_string(&resolved.properties).unwrap_or_default();
                let key = (
                    source,
                    target,
                    resolved.relationship_type.clone(),
                    properties,
                );
                kept.entry(key).or_insert(resolved);
            }
        }

        kept
    }
}

/// Split one resource's monthly cost over categories. An explicit breakdown
/// is used as given; whatever it leaves unexplained, or the whole amount when
/// there is no breakdown, goes to the category of the resource type.
fn attribute_cost(by_category: &mut BTreeMap<CostCategory, f64>, resource: &Resource) {
    let Some(cost) = &resource.cost else {
        return;
    };

    let mut explained = 0.0;
    for (category, amount) in &cost.breakdown {
        *by_category.entry(*category).or_insert(0.0) += amount;
        explained += amount;
    }

    let remainder = cost.monthly_amount - explained;
    if cost.breakdown.is_empty() || remainder.abs() > COST_EPSILON {
        *by_category.entry(resource.category()).or_insert(0.0) += remainder;
    }
}
