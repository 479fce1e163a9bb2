use std::time::Duration;

use serde_json::json;

use dossier_service::{Event, ObserveMode};
use tokio::time;

use crate::acceptance::{self, SpyExtractor};

#[tokio::test]
async fn async_observe_returns_the_snapshot_and_completes_in_the_background() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![
		acceptance::candidate("name", json!("Bob"), 0.95),
	]));
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

	service.on(move |event: &Event| {
		if let Event::ObserveComplete { .. } = event {
			let _ = tx.send(event.clone());
		}
	});
	service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("name", json!("Ada"))]),
		))
		.await
		.expect("Patch failed.");

	let mut request = acceptance::observe_request("subject-1", "Call me Bob.");

	request.mode = ObserveMode::Async;

	let immediate = service.observe(request).await.expect("Observe failed.");

	// The immediate response is the pre-dispatch snapshot with an empty extraction.
	assert_eq!(immediate.profile["name"], json!("Ada"));
	assert_eq!(immediate.queued, Some(true));
	assert!(immediate.updated.is_empty());
	assert!(immediate.extracted.is_empty());
	assert!(immediate.rejected.is_empty());

	let event = time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("Timed out waiting for observe_complete.")
		.expect("Event channel closed.");
	let Event::ObserveComplete { subject, request_id, result, error } = event else {
		panic!("Expected an observe_complete event.");
	};

	assert_eq!(subject, "subject-1");
	assert_eq!(request_id, immediate.request_id);
	assert!(error.is_none());

	let result = result.expect("Missing background result.");

	assert_eq!(result.profile["name"], json!("Bob"));
	assert_eq!(result.updated["name"], json!("Bob"));

	// Exactly one completion event per async observe.
	assert!(
		time::timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
		"Received a second observe_complete event."
	);

	// The background write landed in storage.
	let profile = service
		.get("subject-1")
		.await
		.expect("Get failed.")
		.expect("Profile missing.");

	assert_eq!(profile["name"], json!("Bob"));
}

#[tokio::test]
async fn async_observe_reports_pipeline_failures_via_the_event() {
	let (service, _store) = acceptance::build_service(SpyExtractor::failing(
		dossier_providers::extractor::FailureKind::Timeout,
		true,
	));
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

	service.on(move |event: &Event| {
		if let Event::ObserveComplete { .. } = event {
			let _ = tx.send(event.clone());
		}
	});

	let mut request = acceptance::observe_request("subject-1", "Call me Bob.");

	request.mode = ObserveMode::Async;
	request.on_error = dossier_service::OnError::Throw;

	let immediate = service.observe(request).await.expect("Observe failed.");

	assert_eq!(immediate.queued, Some(true));

	let event = time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("Timed out waiting for observe_complete.")
		.expect("Event channel closed.");
	let Event::ObserveComplete { request_id, result, error, .. } = event else {
		panic!("Expected an observe_complete event.");
	};

	assert_eq!(request_id, immediate.request_id);
	assert!(result.is_none());
	assert!(error.unwrap_or_default().contains("Extractor failed"));
}
