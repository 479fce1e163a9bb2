use std::sync::atomic::Ordering;

use serde_json::json;

use dossier_service::Event;
use dossier_storage::ProfileStore;

use crate::acceptance::{self, SpyExtractor};

#[tokio::test]
async fn patch_replay_returns_the_stored_result_and_leaves_the_etag_alone() {
	let (service, store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let events = acceptance::collect_events(&service);
	let mut request = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"role",
		json!("engineer"),
	)]));

	request.idempotency_key = Some("req-1".to_string());

	let first = service.patch(request.clone()).await.expect("First patch failed.");
	let etag_after_first = store
		.get("subject-1")
		.await
		.expect("Get failed.")
		.expect("Record missing.")
		.etag;
	let second = service.patch(request).await.expect("Second patch failed.");
	let etag_after_second = store
		.get("subject-1")
		.await
		.expect("Get failed.")
		.expect("Record missing.")
		.etag;

	// Structurally equal output, unchanged etag, and no re-emitted events.
	assert_eq!(
		serde_json::to_value(&first).expect("serialize"),
		serde_json::to_value(&second).expect("serialize")
	);
	assert_eq!(etag_after_first, etag_after_second);

	let update_events = events
		.lock()
		.unwrap_or_else(|err| err.into_inner())
		.iter()
		.filter(|event| matches!(event, Event::Update { .. }))
		.count();

	assert_eq!(update_events, 1);
}

#[tokio::test]
async fn distinct_keys_run_the_pipeline_again() {
	let (service, store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let mut request = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"role",
		json!("engineer"),
	)]));

	request.idempotency_key = Some("req-1".to_string());

	service.patch(request.clone()).await.expect("First patch failed.");

	request.idempotency_key = Some("req-2".to_string());

	service.patch(request).await.expect("Second patch failed.");

	let etag = store
		.get("subject-1")
		.await
		.expect("Get failed.")
		.expect("Record missing.")
		.etag;

	assert_eq!(etag, "2");
}

#[tokio::test]
async fn observe_replay_skips_the_extractor() {
	let extractor = SpyExtractor::returning(vec![acceptance::candidate(
		"role",
		json!("engineer"),
		0.9,
	)]);
	let calls = extractor.calls.clone();
	let (service, _store) = acceptance::build_service(extractor);
	let mut request = acceptance::observe_request("subject-1", "I write firmware.");

	request.idempotency_key = Some("req-9".to_string());

	let first = service.observe(request.clone()).await.expect("First observe failed.");
	let second = service.observe(request).await.expect("Second observe failed.");

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(first.request_id, second.request_id);
	assert_eq!(
		serde_json::to_value(&first).expect("serialize"),
		serde_json::to_value(&second).expect("serialize")
	);
}
