use serde_json::json;

use dossier_domain::merge::{HistoryAction, RejectReason};
use dossier_service::HistoryRequest;
use dossier_storage::ProfileStore;

use crate::acceptance::{self, SpyExtractor};

#[tokio::test]
async fn empty_extraction_is_a_no_op_write() {
	let (service, store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let response = service
		.observe(acceptance::observe_request("subject-1", "Nothing of note."))
		.await
		.expect("Observe failed.");

	assert!(response.profile.is_empty());
	assert!(response.updated.is_empty());
	assert!(response.rejected.is_empty());
	// No candidates were accepted, so the record was never created.
	assert!(store.get("subject-1").await.expect("Get failed.").is_none());
}

#[tokio::test]
async fn confidence_below_the_floor_is_rejected_and_at_the_floor_accepted() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let mut below = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"name",
		json!("Ada"),
	)]));

	below.confidence = Some(0.49);

	let response = service.patch(below).await.expect("Patch failed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::LowConfidence);

	let mut at_floor = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"name",
		json!("Ada"),
	)]));

	at_floor.confidence = Some(0.5);

	let response = service.patch(at_floor).await.expect("Patch failed.");

	assert_eq!(response.updated["name"], json!("Ada"));
}

#[tokio::test]
async fn null_into_a_nullable_field_journals_a_delete() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));

	service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("nickname", json!("Lovelace"))]),
		))
		.await
		.expect("Seed patch failed.");

	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("nickname", json!(null))]),
		))
		.await
		.expect("Patch failed.");

	assert!(response.profile["nickname"].is_null());
	assert!(response.rejected.is_empty());

	let page = service
		.history(
			"subject-1",
			HistoryRequest { field: Some("nickname".to_string()), cursor: None, limit: None },
		)
		.await
		.expect("History failed.");
	let actions = page.entries.iter().map(|entry| entry.action).collect::<Vec<_>>();

	assert!(actions.contains(&HistoryAction::Delete));
}

#[tokio::test]
async fn null_into_a_non_nullable_field_is_rejected() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("name", json!(null))]),
		))
		.await
		.expect("Patch failed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::NotNullable);
}

#[tokio::test]
async fn undeclared_fields_are_rejected_as_unknown() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![
		acceptance::candidate("favorite_color", json!("teal"), 0.9),
	]));
	let response = service
		.observe(acceptance::observe_request("subject-1", "I love teal."))
		.await
		.expect("Observe failed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::UnknownField);
	assert!(response.profile.is_empty());
}

#[tokio::test]
async fn string_values_are_truncated_to_the_field_cap() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let long = "p".repeat(600);
	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("bio", json!(long))]),
		))
		.await
		.expect("Patch failed.");
	let stored = response.profile["bio"].as_str().unwrap_or_default();

	assert_eq!(stored.chars().count(), 512);
}
