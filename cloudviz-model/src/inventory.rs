use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{CloudProvider, ExtractionScope};
use crate::render::RenderArtifact;
use crate::resource::{Relationship, Resource};

/// Resource/relationship payload produced by one completed extraction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultStore {
    pub provider: CloudProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ExtractionScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_identifier: Option<String>,
    #[serde(default = "Utc::now")]
    pub extraction_time: DateTime<Utc>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ResultStore {
    pub fn new(provider: CloudProvider) -> Self {
        Self {
            provider,
            scope: None,
            scope_identifier: None,
            extraction_time: Utc::now(),
            resources: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn scoped(mut self, scope: ExtractionScope, identifier: impl Into<String>) -> Self {
        self.scope = Some(scope);
        self.scope_identifier = Some(identifier.into());
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|resource| resource.id == id)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources
            .iter()
            .filter(move |resource| resource.resource_type == resource_type)
    }

    /// Resources carrying `key`, optionally with an exact `value`.
    pub fn resources_with_tag<'a>(
        &'a self,
        key: &'a str,
        value: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.iter().filter(move |resource| {
            match (resource.tags.get(key), value) {
                (Some(_), None) => true,
                (Some(found), Some(expected)) => found == expected,
                (None, _) => false,
            }
        })
    }

    pub fn relationships_of<'a>(
        &'a self,
        resource_id: &'a str,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.relationships
            .iter()
            .filter(move |rel| rel.source_id == resource_id || rel.target_id == resource_id)
    }

    pub fn regions(&self) -> BTreeSet<&str> {
        self.resources.iter().map(|r| r.region.as_str()).collect()
    }
}

/// What a completed job hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobResult {
    Inventory(ResultStore),
    Artifact(RenderArtifact),
}

impl JobResult {
    pub fn inventory(&self) -> Option<&ResultStore> {
        match self {
            JobResult::Inventory(store) => Some(store),
            JobResult::Artifact(_) => None,
        }
    }

    pub fn into_inventory(self) -> Option<ResultStore> {
        match self {
            JobResult::Inventory(store) => Some(store),
            JobResult::Artifact(_) => None,
        }
    }

    pub fn artifact(&self) -> Option<&RenderArtifact> {
        match self {
            JobResult::Artifact(artifact) => Some(artifact),
            JobResult::Inventory(_) => None,
        }
    }
}
