use super::*;

use chrono::Utc;
use shared::{domain::FeedbackId, protocol::Feedback};

fn assessment(feedback: Option<FeedbackRating>) -> Assessment {
    let id = AssessmentId::new();
    Assessment {
        id: id.clone(),
        cluster_id: ClusterId::new(),
        question: "Why do password resets fail?".into(),
        answer: "The reset token expires after five minutes.".into(),
        confidence: 0.82,
        sources: vec!["ticket-1042".into()],
        created_at: Utc::now(),
        feedback: feedback.map(|rating| Feedback {
            id: FeedbackId::new(),
            assessment_id: id,
            rating,
            corrected_answer: None,
            comments: None,
            submitted_by: "sme@example.com".into(),
            created_at: Utc::now(),
        }),
    }
}

fn approve() -> ClusterAction {
    ClusterAction::Approve { comments: None }
}

fn reject(reason: &str) -> ClusterAction {
    ClusterAction::Reject {
        reason: reason.into(),
    }
}

#[test]
fn open_statuses_offer_approve_and_reject() {
    for status in [ClusterStatus::Pending, ClusterStatus::Reviewed] {
        assert_eq!(
            available_actions(status),
            &[ClusterActionKind::Approve, ClusterActionKind::Reject]
        );
    }
    for status in [ClusterStatus::Approved, ClusterStatus::Rejected] {
        assert!(available_actions(status).is_empty());
    }
}

#[test]
fn pending_and_reviewed_clusters_may_be_settled() {
    let id = ClusterId::new();
    for status in [ClusterStatus::Pending, ClusterStatus::Reviewed] {
        check_cluster_action(&id, status, &approve()).expect("approve");
        check_cluster_action(&id, status, &reject("duplicate of #12")).expect("reject");
    }
}

#[test]
fn terminal_clusters_refuse_every_action() {
    let id = ClusterId::new();
    for status in [ClusterStatus::Approved, ClusterStatus::Rejected] {
        for action in [approve(), reject("no longer relevant")] {
            let err = check_cluster_action(&id, status, &action).expect_err("terminal");
            assert!(matches!(err, ConsoleError::IllegalTransition(_)), "{err:?}");
        }
    }
}

#[test]
fn blank_reject_reason_is_a_validation_failure() {
    for reason in ["", "   ", "\n\t"] {
        let err = check_cluster_action(&ClusterId::new(), ClusterStatus::Pending, &reject(reason))
            .expect_err("blank reason");
        assert!(matches!(err, ConsoleError::ValidationFailed(_)));
    }
}

#[test]
fn blank_reason_is_reported_before_terminal_status() {
    let err = check_cluster_action(&ClusterId::new(), ClusterStatus::Rejected, &reject(""))
        .expect_err("refused");
    assert!(matches!(err, ConsoleError::ValidationFailed(_)));
}

#[test]
fn receipts_confirming_the_target_are_accepted() {
    let receipt = TransitionReceipt {
        previous_status: Some(ClusterStatus::Pending),
        status: Some(ClusterStatus::Approved),
        ..TransitionReceipt::default()
    };
    check_transition_receipt(&ClusterId::new(), ClusterActionKind::Approve, &receipt)
        .expect("valid receipt");
    check_transition_receipt(
        &ClusterId::new(),
        ClusterActionKind::Reject,
        &TransitionReceipt::default(),
    )
    .expect("empty receipt");
}

#[test]
fn receipts_leaving_a_terminal_status_are_illegal() {
    let receipt = TransitionReceipt {
        previous_status: Some(ClusterStatus::Rejected),
        status: Some(ClusterStatus::Approved),
        ..TransitionReceipt::default()
    };
    let err = check_transition_receipt(&ClusterId::new(), ClusterActionKind::Approve, &receipt)
        .expect_err("terminal exit");
    assert!(matches!(err, ConsoleError::IllegalTransition(_)));

    let mismatched = TransitionReceipt {
        status: Some(ClusterStatus::Reviewed),
        ..TransitionReceipt::default()
    };
    let err = check_transition_receipt(&ClusterId::new(), ClusterActionKind::Reject, &mismatched)
        .expect_err("wrong target");
    assert!(matches!(err, ConsoleError::IllegalTransition(_)));
}

#[test]
fn assessments_are_graded_once_feedback_exists() {
    assert_eq!(assessment_state(&assessment(None)), AssessmentState::Ungraded);
    assert_eq!(
        assessment_state(&assessment(Some(FeedbackRating::Helpful))),
        AssessmentState::Graded
    );
}

#[test]
fn graded_assessment_refuses_more_feedback() {
    let graded = assessment(Some(FeedbackRating::NotHelpful));
    let draft = FeedbackDraft::new(graded.id.clone(), FeedbackRating::Helpful);
    let err = check_feedback(Some(&graded), &draft).expect_err("already graded");
    assert!(matches!(err, ConsoleError::IllegalTransition(_)));
}

#[test]
fn helpful_rating_with_corrected_answer_is_refused() {
    let ungraded = assessment(None);
    let draft = FeedbackDraft::new(ungraded.id.clone(), FeedbackRating::Helpful)
        .with_corrected_answer("something else");
    let err = check_feedback(Some(&ungraded), &draft).expect_err("contradictory");
    assert!(matches!(err, ConsoleError::ValidationFailed(_)));

    let blank = FeedbackDraft::new(ungraded.id.clone(), FeedbackRating::Helpful).with_corrected_answer("  ");
    check_feedback(Some(&ungraded), &blank).expect("blank correction ignored");
}

#[test]
fn incorrect_rating_is_allowed_with_or_without_a_correction() {
    let ungraded = assessment(None);
    check_feedback(
        Some(&ungraded),
        &FeedbackDraft::new(ungraded.id.clone(), FeedbackRating::Incorrect),
    )
    .expect("bare incorrect");
    check_feedback(
        None,
        &FeedbackDraft::new(ungraded.id.clone(), FeedbackRating::Incorrect)
            .with_corrected_answer("Tokens expire after fifteen minutes."),
    )
    .expect("corrected incorrect");
}

#[test]
fn feedback_request_drops_blank_text() {
    let id = AssessmentId::new();
    let request = FeedbackDraft::new(id.clone(), FeedbackRating::Incorrect)
        .with_corrected_answer("  Restart the sync worker.  ")
        .with_comments("   ")
        .into_request();
    assert_eq!(request.assessment_id, id);
    assert_eq!(request.rating, FeedbackRating::Incorrect);
    assert_eq!(request.corrected_answer.as_deref(), Some("Restart the sync worker."));
    assert!(request.comments.is_none());
}

#[test]
fn ledger_tracks_settled_clusters_and_graded_assessments() {
    let mut ledger = WorkflowLedger::default();
    let cluster = ClusterId::new();
    let assessment = AssessmentId::new();

    ledger.record_settled(cluster.clone(), ClusterStatus::Approved);
    ledger.record_graded(assessment.clone());
    assert_eq!(ledger.settled_status(&cluster), Some(ClusterStatus::Approved));
    assert!(ledger.is_graded(&assessment));

    ledger.forget_cluster(&cluster);
    assert_eq!(ledger.settled_status(&cluster), None);

    ledger.record_settled(cluster.clone(), ClusterStatus::Rejected);
    ledger.clear();
    assert_eq!(ledger.settled_status(&cluster), None);
    assert!(!ledger.is_graded(&assessment));
}
