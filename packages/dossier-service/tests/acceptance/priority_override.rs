use serde_json::json;

use dossier_storage::ProfileStore;

use crate::acceptance::{self, SpyExtractor};

#[tokio::test]
async fn crm_patch_lands_with_low_confidence() {
	let (service, store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let mut request = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"role",
		json!("engineer"),
	)]));

	request.source = Some("crm".to_string());
	request.confidence = Some(0.5);

	let response = service.patch(request).await.expect("Patch failed.");

	assert_eq!(response.profile["role"], json!("engineer"));
	assert_eq!(response.updated["role"], json!("engineer"));
	assert!(response.rejected.is_empty());

	let record = store
		.get("subject-1")
		.await
		.expect("Get failed.")
		.expect("Record missing after patch.");
	let provenance = record.provenance.get("role").expect("Missing provenance for role.");

	assert_eq!(provenance.source, "crm");
	assert_eq!(provenance.confidence, 0.5);
	assert!(!provenance.inferred);
}

#[tokio::test]
async fn crm_overrides_an_observed_value() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![
		acceptance::candidate("role", json!("founder"), 0.9),
	]));

	service
		.observe(acceptance::observe_request("subject-1", "I founded the company."))
		.await
		.expect("Observe failed.");

	let mut request = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"role",
		json!("engineer"),
	)]));

	request.source = Some("crm".to_string());

	let response = service.patch(request).await.expect("Patch failed.");

	assert_eq!(response.profile["role"], json!("engineer"));
	assert!(response.rejected.is_empty());
}
