use serde_json::json;

use dossier_domain::merge::{Candidate, RejectReason};

use crate::acceptance::{self, SpyExtractor, T0_MS};

fn timed_candidate(value: &str, timestamp_ms: i64) -> Candidate {
	Candidate {
		field: "role".to_string(),
		value: json!(value),
		confidence: 0.9,
		inferred: false,
		source: Some("observe".to_string()),
		timestamp_ms: Some(timestamp_ms),
	}
}

#[tokio::test]
async fn newest_candidate_in_a_batch_wins() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![
		timed_candidate("engineer", T0_MS - 1_000),
		timed_candidate("founder", T0_MS),
	]));
	let response = service
		.observe(acceptance::observe_request("subject-1", "Transcript."))
		.await
		.expect("Observe failed.");

	assert_eq!(response.profile["role"], json!("founder"));
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].value, json!("engineer"));
	assert_eq!(response.rejected[0].reason, RejectReason::OlderTimestamp);
}

#[tokio::test]
async fn batch_processes_distinct_fields_independently() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![
		acceptance::candidate("name", json!("Ada"), 0.9),
		acceptance::candidate("age", json!(36), 0.8),
	]));
	let response = service
		.observe(acceptance::observe_request("subject-1", "Transcript."))
		.await
		.expect("Observe failed.");

	assert_eq!(response.updated.len(), 2);
	assert_eq!(response.profile["name"], json!("Ada"));
	assert_eq!(response.profile["age"], json!(36));
	assert!(response.rejected.is_empty());
}
