use serde_json::json;

use dossier_domain::merge::RejectReason;

use crate::acceptance::{self, SpyExtractor};

#[tokio::test]
async fn extras_with_only_invalid_keys_reject_the_whole_field() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("extras", json!({"invalid-key@x": "y"}))]),
		))
		.await
		.expect("Patch failed.");

	assert!(response.profile.is_empty());
	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].field, "extras");
	assert_eq!(response.rejected[0].reason, RejectReason::ExtrasInvalid);
}

#[tokio::test]
async fn extras_accept_dotted_keys_and_truncate_long_strings() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let long = "p".repeat(600);
	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("extras", json!({"support.ticket.priority": long}))]),
		))
		.await
		.expect("Patch failed.");
	let extras = response.profile["extras"].as_object().expect("Extras missing.");
	let stored = extras["support.ticket.priority"].as_str().unwrap_or_default();

	assert_eq!(stored.chars().count(), 512);
}

#[tokio::test]
async fn extras_drop_invalid_members_but_keep_the_rest() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[(
				"extras",
				json!({
					"plan": "pro",
					"bad key!": "dropped",
					"seats": 4,
				}),
			)]),
		))
		.await
		.expect("Patch failed.");
	let extras = response.profile["extras"].as_object().expect("Extras missing.");

	assert_eq!(extras.len(), 2);
	assert_eq!(extras["plan"], json!("pro"));
	assert_eq!(extras["seats"], json!(4));
}

#[tokio::test]
async fn non_map_extras_are_rejected() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("extras", json!("not a map"))]),
		))
		.await
		.expect("Patch failed.");

	assert_eq!(response.rejected.len(), 1);
	assert_eq!(response.rejected[0].reason, RejectReason::ExtrasInvalid);
}
