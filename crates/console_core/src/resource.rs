use serde_json::Value;
use shared::protocol::{AnalyticsSnapshot, Assessment, Cluster, KnowledgeEntry, SchemaMapping};

use crate::{
    cache::{ResourceKey, ResourceKind},
    error::{ConsoleError, Result},
    transport::decode,
};

/// Everything the console caches, one variant per resource shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Analytics(AnalyticsSnapshot),
    Clusters(Vec<Cluster>),
    Cluster(Cluster),
    Assessments(Vec<Assessment>),
    Approvals(Vec<Cluster>),
    Knowledge(Vec<KnowledgeEntry>),
    SchemaMappings(Vec<SchemaMapping>),
}

/// The GET request that populates a key. The key alone determines it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRead {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RemoteRead {
    pub fn for_key(key: &ResourceKey) -> Self {
        let path = match key.kind() {
            ResourceKind::Analytics => "/analytics/dashboard".to_string(),
            ResourceKind::Clusters => match key.param(ResourceKey::ID_PARAM) {
                Some(id) => format!("/clusters/{id}"),
                None => "/clusters".to_string(),
            },
            ResourceKind::Assessments => "/assessments".to_string(),
            ResourceKind::Approvals => "/approval/pending".to_string(),
            ResourceKind::Knowledge => "/knowledge".to_string(),
            ResourceKind::SchemaMappings => "/upload/schema-mappings".to_string(),
        };
        let query = match key.kind() {
            ResourceKind::Clusters | ResourceKind::Assessments => key
                .params()
                .iter()
                .filter(|(name, _)| name.as_str() != ResourceKey::ID_PARAM)
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        };
        Self { path, query }
    }
}

impl Resource {
    pub fn decode(key: &ResourceKey, value: Value) -> Result<Self> {
        Ok(match key.kind() {
            ResourceKind::Analytics => Resource::Analytics(decode(value)?),
            ResourceKind::Clusters if key.param(ResourceKey::ID_PARAM).is_some() => {
                Resource::Cluster(decode(value)?)
            }
            ResourceKind::Clusters => Resource::Clusters(decode(value)?),
            ResourceKind::Assessments => Resource::Assessments(decode(value)?),
            ResourceKind::Approvals => Resource::Approvals(decode(value)?),
            ResourceKind::Knowledge => Resource::Knowledge(decode(value)?),
            ResourceKind::SchemaMappings => Resource::SchemaMappings(decode(value)?),
        })
    }

    fn shape(&self) -> &'static str {
        match self {
            Resource::Analytics(_) => "analytics",
            Resource::Clusters(_) => "cluster list",
            Resource::Cluster(_) => "cluster",
            Resource::Assessments(_) => "assessment list",
            Resource::Approvals(_) => "approval queue",
            Resource::Knowledge(_) => "knowledge list",
            Resource::SchemaMappings(_) => "schema mapping list",
        }
    }

    fn mismatch(self, expected: &str) -> ConsoleError {
        ConsoleError::UnexpectedResponse(format!(
            "expected {expected}, cache holds {}",
            self.shape()
        ))
    }

    pub fn into_analytics(self) -> Result<AnalyticsSnapshot> {
        match self {
            Resource::Analytics(snapshot) => Ok(snapshot),
            other => Err(other.mismatch("analytics")),
        }
    }

    /// Cluster lists and the approval queue both yield clusters.
    pub fn into_clusters(self) -> Result<Vec<Cluster>> {
        match self {
            Resource::Clusters(clusters) | Resource::Approvals(clusters) => Ok(clusters),
            other => Err(other.mismatch("cluster list")),
        }
    }

    pub fn into_cluster(self) -> Result<Cluster> {
        match self {
            Resource::Cluster(cluster) => Ok(cluster),
            other => Err(other.mismatch("cluster")),
        }
    }

    pub fn into_assessments(self) -> Result<Vec<Assessment>> {
        match self {
            Resource::Assessments(assessments) => Ok(assessments),
            other => Err(other.mismatch("assessment list")),
        }
    }

    pub fn into_knowledge(self) -> Result<Vec<KnowledgeEntry>> {
        match self {
            Resource::Knowledge(entries) => Ok(entries),
            other => Err(other.mismatch("knowledge list")),
        }
    }

    pub fn into_schema_mappings(self) -> Result<Vec<SchemaMapping>> {
        match self {
            Resource::SchemaMappings(mappings) => Ok(mappings),
            other => Err(other.mismatch("schema mapping list")),
        }
    }

    /// Clusters carried by this value, whatever its shape.
    pub fn clusters(&self) -> &[Cluster] {
        match self {
            Resource::Clusters(clusters) | Resource::Approvals(clusters) => clusters,
            Resource::Cluster(cluster) => std::slice::from_ref(cluster),
            _ => &[],
        }
    }

    pub fn assessments(&self) -> &[Assessment] {
        match self {
            Resource::Assessments(assessments) => assessments,
            _ => &[],
        }
    }
}

#[cfg(test)]
#[path = "tests/resource_tests.rs"]
mod tests;
