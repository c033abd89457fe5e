use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    ActivityKind, AssessmentId, ClusterId, ClusterStatus, FeedbackId, FeedbackRating,
    KnowledgeId, KnowledgeSourceType, OrgId, SchemaMappingId, SchemaSourceType, TicketId, UserId,
    UserRole,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub org_id: OrgId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: TicketId,
    pub external_id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ticket_count: u64,
    /// Display order is significant.
    #[serde(default)]
    pub common_themes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_resolution: Option<String>,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tickets: Option<Vec<TicketSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub assessment_id: AssessmentId,
    pub rating: FeedbackRating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: AssessmentId,
    pub cluster_id: ClusterId,
    pub question: String,
    pub answer: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl Assessment {
    pub fn is_graded(&self) -> bool {
        self.feedback.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: KnowledgeId,
    pub title: String,
    pub content: String,
    pub source_type: KnowledgeSourceType,
    /// Back-reference to the feedback or assessment that produced the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub id: SchemaMappingId,
    pub name: String,
    pub source_type: SchemaSourceType,
    /// Canonical field name -> source column name.
    pub field_mappings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub total_tickets: u64,
    pub total_clusters: u64,
    pub pending_approvals: u64,
    pub knowledge_entries: u64,
    #[serde(default)]
    pub tickets_by_category: HashMap<String, u64>,
    #[serde(default)]
    pub clusters_by_status: HashMap<String, u64>,
    #[serde(default)]
    pub recent_activity: Vec<ActivityItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateAssessmentRequest {
    pub cluster_id: ClusterId,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub assessment_id: AssessmentId,
    pub rating: FeedbackRating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApproveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// Body returned by approve/reject. Every field is optional because servers
/// differ in how much of the transition they report back. A `status` that is
/// not a cluster status (`"success"`, say) reads as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    #[serde(
        default,
        deserialize_with = "lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_status: Option<ClusterStatus>,
    #[serde(
        default,
        deserialize_with = "lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<ClusterStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<ClusterStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|status| status.parse().ok()))
}

/// What `POST /feedback` answers with: the recorded feedback, or the
/// knowledge entry the feedback was filed as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedbackReceipt {
    Feedback(Feedback),
    Knowledge(KnowledgeEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKnowledgeRequest {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub source_type: KnowledgeSourceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchemaMappingRequest {
    pub name: String,
    pub source_type: SchemaSourceType,
    pub field_mappings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub tickets_created: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Result of `POST /clusters/run`; the remote side reports what it produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusteringRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusters_created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_tolerates_non_status_outcomes() {
        let receipt: TransitionReceipt =
            serde_json::from_str(r#"{"status":"success","message":"Knowledge entry approved"}"#)
                .expect("receipt");
        assert_eq!(receipt.status, None);
        assert_eq!(receipt.message.as_deref(), Some("Knowledge entry approved"));

        let receipt: TransitionReceipt =
            serde_json::from_str(r#"{"previous_status":"pending","status":"approved"}"#)
                .expect("receipt");
        assert_eq!(receipt.previous_status, Some(ClusterStatus::Pending));
        assert_eq!(receipt.status, Some(ClusterStatus::Approved));

        let receipt: TransitionReceipt =
            serde_json::from_str(r#"{"status":null,"previous_status":3}"#).expect("receipt");
        assert!(receipt.status.is_none() && receipt.previous_status.is_none());
    }

    #[test]
    fn feedback_receipt_accepts_either_shape() {
        let entry = serde_json::json!({
            "id": "kn-1",
            "title": "Correction",
            "content": "Disable NIC power saving.",
            "source_type": "feedback",
            "created_at": "2024-05-01T10:00:00Z",
        });
        assert!(matches!(
            serde_json::from_value::<FeedbackReceipt>(entry).expect("entry"),
            FeedbackReceipt::Knowledge(KnowledgeEntry { ref title, .. }) if title == "Correction"
        ));

        let feedback = serde_json::json!({
            "id": "fb-1",
            "assessment_id": "as-1",
            "rating": "helpful",
            "submitted_by": "po@example.com",
            "created_at": "2024-05-01T10:00:00Z",
        });
        assert!(matches!(
            serde_json::from_value::<FeedbackReceipt>(feedback).expect("feedback"),
            FeedbackReceipt::Feedback(Feedback { rating: FeedbackRating::Helpful, .. })
        ));
    }
}
