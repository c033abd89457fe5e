use super::*;

use serde_json::json;
use shared::domain::{ClusterId, ClusterStatus};

fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[test]
fn keys_map_onto_their_endpoints() {
    let cluster_id = ClusterId::new();
    let cases = [
        (ResourceKey::analytics(), "/analytics/dashboard".to_string(), query(&[])),
        (ResourceKey::clusters(None), "/clusters".to_string(), query(&[])),
        (
            ResourceKey::clusters(Some(ClusterStatus::Reviewed)),
            "/clusters".to_string(),
            query(&[("status", "reviewed")]),
        ),
        (
            ResourceKey::cluster(&cluster_id),
            format!("/clusters/{cluster_id}"),
            query(&[]),
        ),
        (
            ResourceKey::assessments(Some(&cluster_id)),
            "/assessments".to_string(),
            query(&[("cluster_id", cluster_id.as_str())]),
        ),
        (ResourceKey::pending_approvals(), "/approval/pending".to_string(), query(&[])),
        (ResourceKey::knowledge(), "/knowledge".to_string(), query(&[])),
        (
            ResourceKey::schema_mappings(),
            "/upload/schema-mappings".to_string(),
            query(&[]),
        ),
    ];

    for (key, path, expected_query) in cases {
        let read = RemoteRead::for_key(&key);
        assert_eq!(read.path, path, "{key}");
        assert_eq!(read.query, expected_query, "{key}");
    }
}

#[test]
fn decoding_follows_the_key_shape() {
    let single = Resource::decode(
        &ResourceKey::cluster(&ClusterId::new()),
        json!({
            "id": ClusterId::new(),
            "name": "Printer jams",
            "ticket_count": 3,
            "status": "pending",
            "created_at": "2026-01-05T10:00:00Z"
        }),
    )
    .expect("single cluster");
    assert_eq!(single.clusters().len(), 1);
    assert_eq!(single.clone().into_cluster().expect("cluster").ticket_count, 3);
    assert!(single.into_clusters().is_err());

    let queue = Resource::decode(&ResourceKey::pending_approvals(), json!([])).expect("queue");
    assert!(queue.into_clusters().expect("clusters").is_empty());
}

#[test]
fn malformed_bodies_are_unexpected_responses() {
    let err = Resource::decode(&ResourceKey::knowledge(), json!({ "entries": [] }))
        .expect_err("not a list");
    assert!(matches!(err, ConsoleError::UnexpectedResponse(_)));

    let err = Resource::Knowledge(Vec::new())
        .into_analytics()
        .expect_err("wrong shape");
    assert!(matches!(err, ConsoleError::UnexpectedResponse(_)));
}
