//! Client-side legality rules for cluster review and assessment feedback.
//!
//! These checks are an optimistic pre-check. The server stays the final
//! authority, and any disagreement it reports forces a resync.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{AssessmentId, ClusterId, ClusterStatus, FeedbackRating},
    protocol::{Assessment, FeedbackRequest, TransitionReceipt},
};
use tracing::warn;

use crate::error::{ConsoleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterActionKind {
    Approve,
    Reject,
}

impl ClusterActionKind {
    pub fn target(self) -> ClusterStatus {
        match self {
            ClusterActionKind::Approve => ClusterStatus::Approved,
            ClusterActionKind::Reject => ClusterStatus::Rejected,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            ClusterActionKind::Approve => "approved",
            ClusterActionKind::Reject => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterAction {
    Approve { comments: Option<String> },
    Reject { reason: String },
}

impl ClusterAction {
    pub fn kind(&self) -> ClusterActionKind {
        match self {
            ClusterAction::Approve { .. } => ClusterActionKind::Approve,
            ClusterAction::Reject { .. } => ClusterActionKind::Reject,
        }
    }

    pub fn target(&self) -> ClusterStatus {
        self.kind().target()
    }

    /// Preconditions that do not depend on the cluster's state.
    pub fn validate(&self) -> Result<()> {
        match self {
            ClusterAction::Reject { reason } if reason.trim().is_empty() => Err(
                ConsoleError::validation("a reason is required to reject a cluster"),
            ),
            _ => Ok(()),
        }
    }
}

/// Actions an operator may be offered for a cluster in `status`.
pub fn available_actions(status: ClusterStatus) -> &'static [ClusterActionKind] {
    if status.is_terminal() {
        &[]
    } else {
        &[ClusterActionKind::Approve, ClusterActionKind::Reject]
    }
}

pub fn check_cluster_action(
    cluster_id: &ClusterId,
    status: ClusterStatus,
    action: &ClusterAction,
) -> Result<()> {
    action.validate()?;
    let target = action.target();
    if !status.can_transition_to(target) {
        return Err(ConsoleError::illegal(format!(
            "cluster {cluster_id} is already {status} and cannot be {}",
            action.kind().verb()
        )));
    }
    Ok(())
}

/// Validates what the server reported after accepting an approve/reject.
pub fn check_transition_receipt(
    cluster_id: &ClusterId,
    action: ClusterActionKind,
    receipt: &TransitionReceipt,
) -> Result<()> {
    if let Some(previous) = receipt.previous_status {
        if previous.is_terminal() {
            return Err(ConsoleError::illegal(format!(
                "server {} cluster {cluster_id} from terminal status {previous}",
                action.verb()
            )));
        }
    }
    if let Some(status) = receipt.status {
        if status != action.target() {
            return Err(ConsoleError::illegal(format!(
                "cluster {cluster_id} is {status} after it was {}",
                action.verb()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentState {
    Ungraded,
    Graded,
}

pub fn assessment_state(assessment: &Assessment) -> AssessmentState {
    if assessment.is_graded() {
        AssessmentState::Graded
    } else {
        AssessmentState::Ungraded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackDraft {
    pub assessment_id: AssessmentId,
    pub rating: FeedbackRating,
    pub corrected_answer: Option<String>,
    pub comments: Option<String>,
}

impl FeedbackDraft {
    pub fn new(assessment_id: AssessmentId, rating: FeedbackRating) -> Self {
        Self {
            assessment_id,
            rating,
            corrected_answer: None,
            comments: None,
        }
    }

    pub fn with_corrected_answer(mut self, answer: impl Into<String>) -> Self {
        self.corrected_answer = Some(answer.into());
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    fn corrected_answer(&self) -> Option<&str> {
        non_blank(self.corrected_answer.as_deref())
    }

    pub fn into_request(self) -> FeedbackRequest {
        FeedbackRequest {
            assessment_id: self.assessment_id,
            rating: self.rating,
            corrected_answer: non_blank(self.corrected_answer.as_deref()).map(str::to_string),
            comments: non_blank(self.comments.as_deref()).map(str::to_string),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// `assessment` is the locally known copy, if any.
pub fn check_feedback(assessment: Option<&Assessment>, draft: &FeedbackDraft) -> Result<()> {
    if let Some(assessment) = assessment {
        if assessment_state(assessment) == AssessmentState::Graded {
            return Err(ConsoleError::illegal(format!(
                "assessment {} already has feedback",
                assessment.id
            )));
        }
    }
    match (draft.rating, draft.corrected_answer()) {
        (FeedbackRating::Helpful, Some(_)) => Err(ConsoleError::validation(
            "a corrected answer cannot accompany a helpful rating",
        )),
        (FeedbackRating::Incorrect, None) => {
            warn!(
                assessment_id = %draft.assessment_id,
                "incorrect rating submitted without a corrected answer"
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Outcomes this client has already driven, so that repeated actions are
/// refused even while cached copies are stale.
#[derive(Debug, Default)]
pub struct WorkflowLedger {
    settled_clusters: HashMap<ClusterId, ClusterStatus>,
    graded_assessments: HashSet<AssessmentId>,
}

impl WorkflowLedger {
    pub fn record_settled(&mut self, cluster_id: ClusterId, status: ClusterStatus) {
        self.settled_clusters.insert(cluster_id, status);
    }

    pub fn settled_status(&self, cluster_id: &ClusterId) -> Option<ClusterStatus> {
        self.settled_clusters.get(cluster_id).copied()
    }

    pub fn forget_cluster(&mut self, cluster_id: &ClusterId) {
        self.settled_clusters.remove(cluster_id);
    }

    pub fn record_graded(&mut self, assessment_id: AssessmentId) {
        self.graded_assessments.insert(assessment_id);
    }

    pub fn is_graded(&self, assessment_id: &AssessmentId) -> bool {
        self.graded_assessments.contains(assessment_id)
    }

    pub fn clear(&mut self) {
        self.settled_clusters.clear();
        self.graded_assessments.clear();
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
