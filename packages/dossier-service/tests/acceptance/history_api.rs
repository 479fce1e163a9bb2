use serde_json::json;

use dossier_domain::merge::HistoryAction;
use dossier_service::{FactsRequest, FiltersRequest, HistoryRequest};

use crate::acceptance::{self, HOUR_MS, SpyExtractor, T0_MS};

async fn seed(service: &dossier_service::DossierService) {
	for (idx, (field, value)) in [
		("name", json!("Ada")),
		("role", json!("engineer")),
		("nickname", json!(null)),
	]
	.into_iter()
	.enumerate()
	{
		let mut request =
			acceptance::patch_request("subject-1", acceptance::facts(&[(field, value)]));

		request.timestamp_ms = Some(T0_MS + idx as i64 * HOUR_MS);

		// The nickname null is a legitimate delete; the others are sets.
		let _ = service.patch(request).await.expect("Seed patch failed.");
	}
}

#[tokio::test]
async fn history_contains_the_full_audit_trail() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));

	seed(&service).await;

	// One rejected candidate joins the journal without changing the profile.
	let mut rejected = acceptance::patch_request("subject-1", acceptance::facts(&[(
		"age",
		json!("not a number"),
	)]));

	rejected.timestamp_ms = Some(T0_MS + 10 * HOUR_MS);

	service.patch(rejected).await.expect("Patch failed.");

	let page = service
		.history("subject-1", HistoryRequest::default())
		.await
		.expect("History failed.");
	let actions = page.entries.iter().map(|entry| entry.action).collect::<Vec<_>>();

	assert!(actions.contains(&HistoryAction::Set));
	assert!(actions.contains(&HistoryAction::Delete));
	assert!(actions.contains(&HistoryAction::Rejected));

	let rejected_row = page
		.entries
		.iter()
		.find(|entry| entry.action == HistoryAction::Rejected)
		.expect("Missing rejected row.");

	assert_eq!(rejected_row.reason.as_deref(), Some("schema_invalid"));
}

#[tokio::test]
async fn history_filters_by_field_and_pages_by_cursor() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));

	seed(&service).await;

	let filtered = service
		.history(
			"subject-1",
			HistoryRequest { field: Some("role".to_string()), cursor: None, limit: None },
		)
		.await
		.expect("History failed.");

	assert_eq!(filtered.entries.len(), 1);
	assert_eq!(filtered.entries[0].field, "role");

	let first_page = service
		.history("subject-1", HistoryRequest { field: None, cursor: None, limit: Some(1) })
		.await
		.expect("History failed.");

	assert_eq!(first_page.entries.len(), 1);

	let cursor = first_page.next_cursor.expect("Expected a next cursor.");
	let second_page = service
		.history(
			"subject-1",
			HistoryRequest { field: None, cursor: Some(cursor), limit: Some(10) },
		)
		.await
		.expect("History failed.");

	assert_eq!(second_page.entries.len(), 2);
	assert!(second_page.next_cursor.is_none());
}

#[tokio::test]
async fn facts_for_prompt_renders_sorted_compact_json() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));

	seed(&service).await;

	let rendered = service
		.facts_for_prompt("subject-1", FactsRequest::default())
		.await
		.expect("facts_for_prompt failed.")
		.expect("Expected a rendering for an existing subject.");

	// Keys sorted alphabetically, nulls omitted by default, no whitespace.
	assert_eq!(rendered, r#"{"name":"Ada","role":"engineer"}"#);

	let with_nulls = service
		.facts_for_prompt(
			"subject-1",
			FactsRequest { select: None, include_nulls: true },
		)
		.await
		.expect("facts_for_prompt failed.")
		.expect("Expected a rendering.");

	assert_eq!(with_nulls, r#"{"name":"Ada","nickname":null,"role":"engineer"}"#);

	let selected = service
		.facts_for_prompt(
			"subject-1",
			FactsRequest { select: Some(vec!["role".to_string()]), include_nulls: false },
		)
		.await
		.expect("facts_for_prompt failed.")
		.expect("Expected a rendering.");

	assert_eq!(selected, r#"{"role":"engineer"}"#);

	let absent = service
		.facts_for_prompt("nobody", FactsRequest::default())
		.await
		.expect("facts_for_prompt failed.");

	assert!(absent.is_none());
}

#[tokio::test]
async fn filters_return_only_non_null_fields() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));

	seed(&service).await;

	let filters = service
		.filters("subject-1", FiltersRequest::default())
		.await
		.expect("filters failed.");

	assert_eq!(filters.len(), 2);
	assert!(filters.get("nickname").is_none());

	let selected = service
		.filters(
			"subject-1",
			FiltersRequest { select: Some(vec!["name".to_string()]) },
		)
		.await
		.expect("filters failed.");

	assert_eq!(selected.len(), 1);
	assert_eq!(selected["name"], json!("Ada"));

	let absent =
		service.filters("nobody", FiltersRequest::default()).await.expect("filters failed.");

	assert!(absent.is_empty());
}

#[tokio::test]
async fn delete_removes_profile_and_journal() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));

	seed(&service).await;

	assert!(service.delete("subject-1").await.expect("Delete failed."));
	assert!(service.get("subject-1").await.expect("Get failed.").is_none());

	let page = service
		.history("subject-1", HistoryRequest::default())
		.await
		.expect("History failed.");

	assert!(page.entries.is_empty());
	assert!(!service.delete("subject-1").await.expect("Second delete failed."));
}
