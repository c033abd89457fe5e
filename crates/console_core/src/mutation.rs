use std::{
    collections::HashSet,
    fmt,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{info, warn};

use crate::{
    cache::{EntityCache, KeyPattern, ResourceKey, ResourceKind},
    error::{ConsoleError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    RunClustering,
    GenerateAssessment,
    SubmitFeedback,
    ApproveCluster,
    RejectCluster,
    AddKnowledge,
    UploadTickets,
    CreateSchemaMapping,
}

/// What each successful write makes stale. Kind patterns cover every
/// parameterization of a resource, including the single-cluster key.
pub const INVALIDATION_TABLE: &[(MutationKind, &[ResourceKind])] = &[
    (
        MutationKind::RunClustering,
        &[ResourceKind::Clusters, ResourceKind::Analytics],
    ),
    (MutationKind::GenerateAssessment, &[ResourceKind::Assessments]),
    (
        MutationKind::SubmitFeedback,
        &[ResourceKind::Assessments, ResourceKind::Knowledge],
    ),
    (
        MutationKind::ApproveCluster,
        &[
            ResourceKind::Approvals,
            ResourceKind::Clusters,
            ResourceKind::Analytics,
        ],
    ),
    (
        MutationKind::RejectCluster,
        &[ResourceKind::Approvals, ResourceKind::Clusters],
    ),
    (MutationKind::AddKnowledge, &[ResourceKind::Knowledge]),
    (MutationKind::UploadTickets, &[ResourceKind::Analytics]),
    (
        MutationKind::CreateSchemaMapping,
        &[ResourceKind::SchemaMappings],
    ),
];

impl MutationKind {
    pub const ALL: [MutationKind; 8] = [
        MutationKind::RunClustering,
        MutationKind::GenerateAssessment,
        MutationKind::SubmitFeedback,
        MutationKind::ApproveCluster,
        MutationKind::RejectCluster,
        MutationKind::AddKnowledge,
        MutationKind::UploadTickets,
        MutationKind::CreateSchemaMapping,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MutationKind::RunClustering => "run clustering",
            MutationKind::GenerateAssessment => "generate assessment",
            MutationKind::SubmitFeedback => "submit feedback",
            MutationKind::ApproveCluster => "approve cluster",
            MutationKind::RejectCluster => "reject cluster",
            MutationKind::AddKnowledge => "add knowledge entry",
            MutationKind::UploadTickets => "upload tickets",
            MutationKind::CreateSchemaMapping => "create schema mapping",
        }
    }

    pub fn invalidated_kinds(self) -> &'static [ResourceKind] {
        INVALIDATION_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, kinds)| *kinds)
            .unwrap_or(&[])
    }

    pub fn invalidates(self) -> Vec<KeyPattern> {
        self.invalidated_kinds()
            .iter()
            .copied()
            .map(KeyPattern::Kind)
            .collect()
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct MutationSpec {
    pub kind: MutationKind,
    /// Entity being written, if any. Two writes of one kind to one subject
    /// may not run concurrently.
    pub subject: Option<String>,
    pub invalidates: Vec<KeyPattern>,
}

impl MutationSpec {
    pub fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            subject: None,
            invalidates: kind.invalidates(),
        }
    }

    pub fn about(mut self, subject: impl ToString) -> Self {
        self.subject = Some(subject.to_string());
        self
    }
}

type PendingKey = (MutationKind, Option<String>);

/// Runs remote writes once each and applies their invalidation policy on
/// success. Failed writes leave the cache untouched.
pub struct MutationExecutor<V> {
    cache: EntityCache<V>,
    pending: Arc<Mutex<HashSet<PendingKey>>>,
}

impl<V> MutationExecutor<V> {
    pub fn new(cache: EntityCache<V>) -> Self {
        Self {
            cache,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_pending(&self, kind: MutationKind, subject: Option<&str>) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(kind, subject.map(str::to_string)))
    }

    /// Awaits `write` once. `write` must not have been polled yet: if an
    /// identical mutation is already running it is dropped unsent.
    pub async fn execute<T, Fut>(&self, spec: MutationSpec, write: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _claim = self.claim(&spec)?;
        info!(mutation = %spec.kind, subject = ?spec.subject, "mutation started");

        match write.await {
            Ok(value) => {
                let invalidated = self.apply_policy(&spec);
                info!(
                    mutation = %spec.kind,
                    subject = ?spec.subject,
                    invalidated = invalidated.len(),
                    "mutation succeeded"
                );
                Ok(value)
            }
            Err(err) => {
                warn!(mutation = %spec.kind, subject = ?spec.subject, error = %err, "mutation failed");
                Err(err)
            }
        }
    }

    /// Marks every key the policy names stale; returns the keys that changed.
    pub fn apply_policy(&self, spec: &MutationSpec) -> Vec<ResourceKey> {
        let mut changed = Vec::new();
        for pattern in &spec.invalidates {
            changed.extend(self.cache.invalidate(pattern));
        }
        changed
    }

    fn claim(&self, spec: &MutationSpec) -> Result<PendingClaim> {
        let key = (spec.kind, spec.subject.clone());
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(key.clone()) {
            return Err(ConsoleError::validation(format!(
                "{} is already in progress",
                spec.kind
            )));
        }
        Ok(PendingClaim {
            pending: Arc::clone(&self.pending),
            key,
        })
    }
}

struct PendingClaim {
    pending: Arc<Mutex<HashSet<PendingKey>>>,
    key: PendingKey,
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
