use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Duration,
};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{AssessmentId, ClusterId, ClusterStatus},
    protocol::{
        AnalyticsSnapshot, ApproveRequest, Assessment, Cluster, ClusteringRun, FeedbackReceipt,
        GenerateAssessmentRequest, KnowledgeEntry, LoginResponse, RejectRequest, SchemaMapping,
        TransitionReceipt, UploadResult, User,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod cache;
pub mod drafts;
pub mod error;
pub mod fetch;
pub mod mutation;
pub mod resource;
pub mod transport;
pub mod workflow;

pub use cache::{
    CacheChange, CacheEntry, CacheEvent, EntityCache, Freshness, KeyPattern, ResourceKey,
    ResourceKind, Subscription,
};
pub use drafts::{KnowledgeDraft, SchemaMappingDraft};
pub use error::ConsoleError;
pub use fetch::FetchCoordinator;
pub use mutation::{MutationExecutor, MutationKind, MutationSpec};
pub use resource::Resource;
pub use transport::{HttpTransport, TicketUpload, Transport};
pub use workflow::{ClusterAction, FeedbackDraft, WorkflowLedger};

use error::Result;
use resource::RemoteRead;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Fresh entries older than this are refetched on the next read.
    pub stale_after: Option<Duration>,
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            stale_after: None,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SignedIn(User),
    SignedOut { reason: String },
    ActionSucceeded { action: String, message: String },
    ActionFailed { action: String, message: String },
}

/// Operator console client: cached reads, validated writes, and the
/// invalidation that keeps them consistent.
pub struct TriageClient {
    transport: Arc<dyn Transport>,
    cache: EntityCache<Resource>,
    fetcher: FetchCoordinator<Resource>,
    mutations: MutationExecutor<Resource>,
    ledger: Mutex<WorkflowLedger>,
    session: RwLock<Option<User>>,
    events: broadcast::Sender<ClientEvent>,
}

impl TriageClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    pub fn with_options(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let cache = EntityCache::new();
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            transport,
            fetcher: FetchCoordinator::new(cache.clone()).with_stale_after(options.stale_after),
            mutations: MutationExecutor::new(cache.clone()),
            cache,
            ledger: Mutex::new(WorkflowLedger::default()),
            session: RwLock::new(None),
            events,
        }
    }

    pub fn cache(&self) -> &EntityCache<Resource> {
        &self.cache
    }

    pub fn cached(&self, key: &ResourceKey) -> Option<CacheEntry<Resource>> {
        self.cache.get(key)
    }

    pub fn subscribe<F>(&self, key: ResourceKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.cache.subscribe(key, callback)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Option<User> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_mutation_pending(&self, kind: MutationKind, subject: Option<&str>) -> bool {
        self.mutations.is_pending(kind, subject)
    }

    pub fn collect_garbage(&self) -> usize {
        self.cache.prune_unobserved()
    }

    fn ledger(&self) -> MutexGuard<'_, WorkflowLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        const ACTION: &str = "sign in";
        let result: Result<LoginResponse> = async {
            let request = drafts::login_request(email, password)?;
            let response = self
                .transport
                .post("/auth/login", Some(serde_json::to_value(&request)?))
                .await?;
            transport::decode(response)
        }
        .await;

        match result {
            Ok(LoginResponse { user, token }) => {
                self.cache.clear();
                self.ledger().clear();
                self.transport.set_token(Some(token));
                *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(user.clone());
                info!(user = %user.email, role = ?user.role, "signed in");
                self.emit(ClientEvent::SignedIn(user.clone()));
                Ok(user)
            }
            Err(err) => {
                // A refused login is a failed action, not a session teardown.
                self.report_failure(ACTION, &err);
                Err(err)
            }
        }
    }

    pub fn logout(&self) {
        self.sign_out("signed out");
    }

    fn sign_out(&self, reason: &str) {
        self.transport.set_token(None);
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.cache.clear();
        self.ledger().clear();
        info!(reason, "session torn down");
        self.emit(ClientEvent::SignedOut {
            reason: reason.to_string(),
        });
    }

    fn require_session(&self) -> Result<()> {
        if self.transport.has_token() {
            Ok(())
        } else {
            Err(ConsoleError::AuthRejected("not signed in".to_string()))
        }
    }

    fn report_failure(&self, action: &str, err: &ConsoleError) {
        let message = err.notification(action);
        warn!(action, error = %err, "action failed");
        self.emit(ClientEvent::ActionFailed {
            action: action.to_string(),
            message,
        });
    }

    /// Surfaces exactly one notification for the action's outcome.
    fn finish<T>(
        &self,
        action: &str,
        result: Result<T>,
        success: impl FnOnce(&T) -> Option<String>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                if let Some(message) = success(&value) {
                    self.emit(ClientEvent::ActionSucceeded {
                        action: action.to_string(),
                        message,
                    });
                }
                Ok(value)
            }
            Err(err) => {
                if err.is_auth_rejected() {
                    self.sign_out(&err.to_string());
                }
                self.report_failure(action, &err);
                Err(err)
            }
        }
    }

    /// Reads `key` through the cache.
    pub async fn load(&self, key: ResourceKey) -> Result<Resource> {
        let action = format!("load {}", key.kind());
        let result = self.read(key).await;
        self.finish(&action, result, |_| None)
    }

    /// Refetches `key` even if it is fresh.
    pub async fn revalidate(&self, key: ResourceKey) -> Result<Resource> {
        let action = format!("refresh {}", key.kind());
        let result = self.read_fresh(key).await;
        self.finish(&action, result, |_| None)
    }

    async fn read(&self, key: ResourceKey) -> Result<Resource> {
        self.require_session()?;
        let transport = Arc::clone(&self.transport);
        let fetch_key = key.clone();
        self.fetcher
            .ensure(key, move || fetch_resource(transport, fetch_key))
            .await
    }

    async fn read_fresh(&self, key: ResourceKey) -> Result<Resource> {
        self.require_session()?;
        let transport = Arc::clone(&self.transport);
        let fetch_key = key.clone();
        self.fetcher
            .refetch(key, move || fetch_resource(transport, fetch_key))
            .await
    }

    /// Eagerly refetches every stale key that still has subscribers.
    /// Returns how many refreshed successfully.
    pub async fn refresh_stale(&self) -> usize {
        let keys = self.cache.observed_stale_keys();
        if keys.is_empty() {
            return 0;
        }
        let results = join_all(keys.iter().map(|key| self.read(key.clone()))).await;
        let mut refreshed = 0;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(_) => refreshed += 1,
                Err(err) if err.is_auth_rejected() => {
                    self.finish::<()>("refresh", Err(err), |_| None).ok();
                    break;
                }
                Err(err) => warn!(%key, error = %err, "background refresh failed"),
            }
        }
        refreshed
    }

    pub async fn analytics(&self) -> Result<AnalyticsSnapshot> {
        self.load(ResourceKey::analytics()).await?.into_analytics()
    }

    pub async fn clusters(&self, status: Option<ClusterStatus>) -> Result<Vec<Cluster>> {
        self.load(ResourceKey::clusters(status))
            .await?
            .into_clusters()
    }

    pub async fn cluster(&self, id: &ClusterId) -> Result<Cluster> {
        self.load(ResourceKey::cluster(id)).await?.into_cluster()
    }

    pub async fn assessments(&self, cluster_id: Option<&ClusterId>) -> Result<Vec<Assessment>> {
        self.load(ResourceKey::assessments(cluster_id))
            .await?
            .into_assessments()
    }

    pub async fn pending_approvals(&self) -> Result<Vec<Cluster>> {
        self.load(ResourceKey::pending_approvals())
            .await?
            .into_clusters()
    }

    pub async fn knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        self.load(ResourceKey::knowledge()).await?.into_knowledge()
    }

    pub async fn schema_mappings(&self) -> Result<Vec<SchemaMapping>> {
        self.load(ResourceKey::schema_mappings())
            .await?
            .into_schema_mappings()
    }

    async fn write<T: DeserializeOwned + Default>(
        &self,
        spec: MutationSpec,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        self.require_session()?;
        let response = self
            .mutations
            .execute(spec, self.transport.post(path, body))
            .await?;
        decode_or_default(response)
    }

    pub async fn run_clustering(&self) -> Result<ClusteringRun> {
        let result = self
            .write(MutationSpec::new(MutationKind::RunClustering), "/clusters/run", None)
            .await;
        self.finish(MutationKind::RunClustering.label(), result, |run: &ClusteringRun| {
            Some(match run.clusters_created {
                Some(count) => format!("Clustering produced {count} clusters"),
                None => "Clustering started".to_string(),
            })
        })
    }

    pub async fn generate_assessment(
        &self,
        cluster_id: &ClusterId,
        question: &str,
    ) -> Result<Assessment> {
        let action = MutationKind::GenerateAssessment.label();
        let result: Result<Assessment> = async {
            let question = drafts::validate_question(question)?;
            self.require_session()?;
            let body = serde_json::to_value(GenerateAssessmentRequest {
                cluster_id: cluster_id.clone(),
                question,
            })?;
            let response = self
                .mutations
                .execute(
                    MutationSpec::new(MutationKind::GenerateAssessment).about(cluster_id),
                    self.transport.post("/assessments/generate", Some(body)),
                )
                .await?;
            transport::decode::<Assessment>(response)
        }
        .await;
        self.finish(action, result, |_| Some("Assessment generated".to_string()))
    }

    /// Returns what the server reported back, when it is a shape this client
    /// knows.
    pub async fn submit_feedback(&self, draft: FeedbackDraft) -> Result<Option<FeedbackReceipt>> {
        let action = MutationKind::SubmitFeedback.label();
        let result = self.submit_feedback_inner(draft).await;
        self.finish(action, result, |_| Some("Feedback submitted".to_string()))
    }

    async fn submit_feedback_inner(
        &self,
        draft: FeedbackDraft,
    ) -> Result<Option<FeedbackReceipt>> {
        self.require_session()?;
        let assessment_id = draft.assessment_id.clone();
        if self.ledger().is_graded(&assessment_id) {
            return Err(ConsoleError::illegal(format!(
                "assessment {assessment_id} already has feedback"
            )));
        }

        let known = match self.cached_assessment(&assessment_id) {
            Some(assessment) => Some(assessment),
            None => self.lookup_assessment(&assessment_id).await?,
        };
        workflow::check_feedback(known.as_ref(), &draft)?;

        let body = serde_json::to_value(draft.into_request())?;
        let response = self
            .mutations
            .execute(
                MutationSpec::new(MutationKind::SubmitFeedback).about(&assessment_id),
                self.transport.post("/feedback", Some(body)),
            )
            .await;

        match response {
            Ok(value) => {
                self.ledger().record_graded(assessment_id.clone());
                if value.is_null() {
                    return Ok(None);
                }
                match serde_json::from_value::<FeedbackReceipt>(value) {
                    Ok(receipt) => Ok(Some(receipt)),
                    Err(err) => {
                        debug!(%assessment_id, error = %err, "feedback reply not understood");
                        Ok(None)
                    }
                }
            }
            Err(err) if err.is_state_conflict() => {
                self.ledger().record_graded(assessment_id.clone());
                self.resync_assessment(&assessment_id).await;
                Err(ConsoleError::illegal(format!(
                    "assessment {assessment_id} already has feedback"
                )))
            }
            Err(err) => Err(err),
        }
    }

    fn cached_assessment(&self, id: &AssessmentId) -> Option<Assessment> {
        self.cache
            .values_matching(&KeyPattern::Kind(ResourceKind::Assessments))
            .into_iter()
            .find_map(|(_, value)| {
                value
                    .assessments()
                    .iter()
                    .find(|assessment| assessment.id == *id)
                    .cloned()
            })
    }

    async fn lookup_assessment(&self, id: &AssessmentId) -> Result<Option<Assessment>> {
        let assessments = self
            .read(ResourceKey::assessments(None))
            .await?
            .into_assessments()?;
        Ok(assessments.into_iter().find(|assessment| assessment.id == *id))
    }

    async fn resync_assessment(&self, id: &AssessmentId) {
        let keys: Vec<ResourceKey> = self
            .cache
            .values_matching(&KeyPattern::Kind(ResourceKind::Assessments))
            .into_iter()
            .filter(|(_, value)| value.assessments().iter().any(|a| a.id == *id))
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            if let Err(err) = self.read_fresh(key.clone()).await {
                warn!(%key, error = %err, "assessment resync failed");
            }
        }
    }

    pub async fn approve_cluster(
        &self,
        cluster_id: &ClusterId,
        comments: Option<String>,
    ) -> Result<TransitionReceipt> {
        let action = ClusterAction::Approve { comments };
        let result = self.transition_cluster(cluster_id, action).await;
        self.finish(MutationKind::ApproveCluster.label(), result, |_| {
            Some("Cluster approved".to_string())
        })
    }

    pub async fn reject_cluster(
        &self,
        cluster_id: &ClusterId,
        reason: &str,
    ) -> Result<TransitionReceipt> {
        let action = ClusterAction::Reject {
            reason: reason.to_string(),
        };
        let result = self.transition_cluster(cluster_id, action).await;
        self.finish(MutationKind::RejectCluster.label(), result, |_| {
            Some("Cluster rejected".to_string())
        })
    }

    async fn transition_cluster(
        &self,
        cluster_id: &ClusterId,
        action: ClusterAction,
    ) -> Result<TransitionReceipt> {
        action.validate()?;
        self.require_session()?;

        let status = self.current_cluster_status(cluster_id).await?;
        workflow::check_cluster_action(cluster_id, status, &action)?;

        let kind = action.kind();
        let (mutation, path, body) = match action {
            ClusterAction::Approve { comments } => (
                MutationKind::ApproveCluster,
                format!("/approval/{cluster_id}/approve"),
                serde_json::to_value(ApproveRequest { comments })?,
            ),
            ClusterAction::Reject { reason } => (
                MutationKind::RejectCluster,
                format!("/approval/{cluster_id}/reject"),
                serde_json::to_value(RejectRequest {
                    reason: reason.trim().to_string(),
                })?,
            ),
        };

        let response = self
            .mutations
            .execute(
                MutationSpec::new(mutation).about(cluster_id),
                self.transport.post(&path, Some(body)),
            )
            .await;

        let receipt: TransitionReceipt = match response {
            // The write has landed; a reply we cannot read does not undo it.
            Ok(value) => decode_or_default(value).unwrap_or_else(|err| {
                warn!(%cluster_id, error = %err, "transition receipt not understood");
                TransitionReceipt::default()
            }),
            // Approval endpoints answer 400 once the cluster has left the
            // review queue.
            Err(err)
                if err.is_state_conflict()
                    || matches!(err, ConsoleError::RemoteRejected { status: 400, .. }) =>
            {
                let err = match err {
                    ConsoleError::RemoteRejected { message, .. } => {
                        ConsoleError::IllegalTransition(message)
                    }
                    other => other,
                };
                self.resync_cluster(cluster_id).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = workflow::check_transition_receipt(cluster_id, kind, &receipt) {
            self.resync_cluster(cluster_id).await;
            return Err(err);
        }
        self.ledger().record_settled(cluster_id.clone(), kind.target());
        Ok(receipt)
    }

    /// Status from what this client settled, then the cache, then the server.
    async fn current_cluster_status(&self, cluster_id: &ClusterId) -> Result<ClusterStatus> {
        let settled = self.ledger().settled_status(cluster_id);
        if let Some(status) = settled.or_else(|| self.cached_cluster_status(cluster_id)) {
            return Ok(status);
        }
        Ok(self
            .read(ResourceKey::cluster(cluster_id))
            .await?
            .into_cluster()?
            .status)
    }

    fn cached_cluster_status(&self, cluster_id: &ClusterId) -> Option<ClusterStatus> {
        let single = self
            .cache
            .get(&ResourceKey::cluster(cluster_id))
            .and_then(|entry| entry.value)
            .map(|value| value.clusters().to_vec())
            .unwrap_or_default();
        let lists = [
            KeyPattern::Kind(ResourceKind::Clusters),
            KeyPattern::Kind(ResourceKind::Approvals),
        ]
        .iter()
        .flat_map(|pattern| self.cache.values_matching(pattern))
        .flat_map(|(_, value)| value.clusters().to_vec());

        single
            .into_iter()
            .chain(lists)
            .find(|cluster| cluster.id == *cluster_id)
            .map(|cluster| cluster.status)
    }

    /// Drops local belief about a cluster and refetches it from the server.
    async fn resync_cluster(&self, cluster_id: &ClusterId) {
        self.ledger().forget_cluster(cluster_id);
        self.cache
            .invalidate(&KeyPattern::Kind(ResourceKind::Clusters));
        self.cache
            .invalidate(&KeyPattern::Kind(ResourceKind::Approvals));
        let key = ResourceKey::cluster(cluster_id);
        match self.read_fresh(key).await {
            Ok(resource) => {
                if let Some(cluster) = resource.clusters().first() {
                    info!(%cluster_id, status = %cluster.status, "cluster resynced");
                }
            }
            Err(err) => warn!(%cluster_id, error = %err, "cluster resync failed"),
        }
    }

    pub async fn add_knowledge(&self, draft: KnowledgeDraft) -> Result<KnowledgeEntry> {
        let action = MutationKind::AddKnowledge.label();
        let result: Result<KnowledgeEntry> = async {
            let request = draft.into_request()?;
            self.require_session()?;
            let response = self
                .mutations
                .execute(
                    MutationSpec::new(MutationKind::AddKnowledge),
                    self.transport
                        .post("/knowledge", Some(serde_json::to_value(&request)?)),
                )
                .await?;
            transport::decode::<KnowledgeEntry>(response)
        }
        .await;
        self.finish(action, result, |entry| {
            Some(format!("Knowledge entry \"{}\" added", entry.title))
        })
    }

    pub async fn upload_tickets(&self, upload: TicketUpload) -> Result<UploadResult> {
        let action = MutationKind::UploadTickets.label();
        let result: Result<UploadResult> = async {
            let format = drafts::validate_upload(&upload)?;
            self.require_session()?;
            info!(filename = %upload.filename, ?format, "uploading ticket export");
            let response = self
                .mutations
                .execute(
                    MutationSpec::new(MutationKind::UploadTickets),
                    self.transport.post_multipart("/upload/tickets", upload),
                )
                .await?;
            transport::decode::<UploadResult>(response)
        }
        .await;
        self.finish(action, result, |outcome| {
            if !outcome.errors.is_empty() {
                warn!(errors = outcome.errors.len(), "upload reported row errors");
            }
            Some(format!(
                "Successfully uploaded {} tickets",
                outcome.tickets_created
            ))
        })
    }

    pub async fn create_schema_mapping(&self, draft: SchemaMappingDraft) -> Result<SchemaMapping> {
        let action = MutationKind::CreateSchemaMapping.label();
        let result: Result<SchemaMapping> = async {
            let request = draft.into_request()?;
            self.require_session()?;
            let response = self
                .mutations
                .execute(
                    MutationSpec::new(MutationKind::CreateSchemaMapping),
                    self.transport.post(
                        "/upload/schema-mappings",
                        Some(serde_json::to_value(&request)?),
                    ),
                )
                .await?;
            transport::decode::<SchemaMapping>(response)
        }
        .await;
        self.finish(action, result, |mapping| {
            Some(format!("Schema mapping \"{}\" saved", mapping.name))
        })
    }
}

async fn fetch_resource(transport: Arc<dyn Transport>, key: ResourceKey) -> Result<Resource> {
    let read = RemoteRead::for_key(&key);
    let value = transport.get(&read.path, &read.query).await?;
    Resource::decode(&key, value)
}

fn decode_or_default<T: DeserializeOwned + Default>(value: Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    transport::decode(value)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
