use std::sync::{Arc, atomic::AtomicUsize};

use serde_json::json;

use dossier_providers::extractor::FailureKind;
use dossier_service::{DossierService, Error, OnError, Providers};
use dossier_storage::ProfileStore;
use dossier_storage::memory::MemoryStore;

use crate::acceptance::{self, ConflictingStore, SpyExtractor};

#[tokio::test]
async fn operations_require_a_registered_schema() {
	let cfg = acceptance::test_config();
	let store = Arc::new(MemoryStore::new(&cfg.storage.memory));
	let service = DossierService::with_providers(
		cfg,
		store,
		Providers::new(Arc::new(SpyExtractor::returning(vec![]))),
	);
	let observe = service.observe(acceptance::observe_request("subject-1", "text")).await;

	assert!(matches!(observe, Err(Error::SchemaNotRegistered)));

	let patch = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("name", json!("Ada"))]),
		))
		.await;

	assert!(matches!(patch, Err(Error::SchemaNotRegistered)));
}

#[tokio::test]
async fn registering_an_invalid_schema_is_a_typed_error() {
	let (service, _store) = acceptance::build_service(SpyExtractor::returning(vec![]));
	let result = service.register_schema(dossier_domain::schema::ProfileSchema::default());

	assert!(matches!(result, Err(Error::SchemaInvalid { .. })));
}

#[tokio::test]
async fn observe_requires_an_extractor_configuration() {
	let mut cfg = acceptance::test_config();

	cfg.providers.llm_extractor = None;

	let store = Arc::new(MemoryStore::new(&cfg.storage.memory));
	let service = DossierService::with_providers(
		cfg,
		store,
		Providers::new(Arc::new(SpyExtractor::returning(vec![]))),
	);

	service.register_schema(acceptance::test_schema()).expect("Failed to register schema.");

	let observe = service.observe(acceptance::observe_request("subject-1", "text")).await;

	assert!(matches!(observe, Err(Error::ExtractorNotConfigured)));

	// Patch does not involve the extractor at all.
	let patch = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("name", json!("Ada"))]),
		))
		.await
		.expect("Patch failed.");

	assert_eq!(patch.profile["name"], json!("Ada"));
}

#[tokio::test]
async fn extractor_failure_with_on_error_throw_surfaces() {
	let (service, _store) =
		acceptance::build_service(SpyExtractor::failing(FailureKind::ApiError, true));
	let mut request = acceptance::observe_request("subject-1", "text");

	request.on_error = OnError::Throw;

	let result = service.observe(request).await;

	assert!(matches!(result, Err(Error::Extractor { retryable: true, .. })));
}

#[tokio::test]
async fn extractor_failure_with_on_error_skip_merges_nothing() {
	let (service, store) =
		acceptance::build_service(SpyExtractor::failing(FailureKind::Timeout, true));
	let response = service
		.observe(acceptance::observe_request("subject-1", "text"))
		.await
		.expect("Observe failed.");

	assert!(response.updated.is_empty());
	assert!(response.rejected.is_empty());
	assert!(store.get("subject-1").await.expect("Get failed.").is_none());
}

#[tokio::test]
async fn one_cas_conflict_is_retried_transparently() {
	let cfg = acceptance::test_config();
	let inner = Arc::new(MemoryStore::new(&cfg.storage.memory));
	let store = Arc::new(ConflictingStore { inner, conflicts: AtomicUsize::new(1) });
	let service = DossierService::with_providers(
		cfg,
		store,
		Providers::new(Arc::new(SpyExtractor::returning(vec![]))),
	);

	service.register_schema(acceptance::test_schema()).expect("Failed to register schema.");

	let response = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("name", json!("Ada"))]),
		))
		.await
		.expect("Patch should succeed after one retry.");

	assert_eq!(response.profile["name"], json!("Ada"));
}

#[tokio::test]
async fn a_second_cas_conflict_surfaces_as_a_persistence_error() {
	let cfg = acceptance::test_config();
	let inner = Arc::new(MemoryStore::new(&cfg.storage.memory));
	let store = Arc::new(ConflictingStore { inner, conflicts: AtomicUsize::new(2) });
	let service = DossierService::with_providers(
		cfg,
		store,
		Providers::new(Arc::new(SpyExtractor::returning(vec![]))),
	);

	service.register_schema(acceptance::test_schema()).expect("Failed to register schema.");

	let result = service
		.patch(acceptance::patch_request(
			"subject-1",
			acceptance::facts(&[("name", json!("Ada"))]),
		))
		.await;
	let Err(Error::Persistence { attempts, .. }) = result else {
		panic!("Expected a persistence error.");
	};

	assert_eq!(attempts, 2);
}
