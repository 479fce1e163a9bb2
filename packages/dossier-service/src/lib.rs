pub mod delete;
pub mod history;
pub mod observe;
pub mod patch;
pub mod profile;

mod error;
mod events;
mod idempotency;

pub use self::{
	error::{Error, Result},
	events::{Event, EventListener},
	history::HistoryRequest,
	observe::{ExtractFrom, ObserveMode, ObserveRequest, ObserveResponse, OnError},
	patch::{PatchRequest, PatchResponse},
	profile::{FactsRequest, FiltersRequest},
};

use std::{
	collections::BTreeMap,
	future::Future,
	pin::Pin,
	sync::{Arc, RwLock},
};

use serde_json::{Map, Value};
use time::OffsetDateTime;

use dossier_config::{Config, LlmProviderConfig};
use dossier_domain::{
	extras,
	merge::{
		Candidate, HistoryAction, HistoryEntry, MergeArgs, RejectReason, Rejection, merge,
	},
	schema::ProfileSchema,
};
use dossier_providers::extractor::{self as extractor_client, ExtractorOutcome};
use dossier_storage::{ProfileStore, models::SetOptions};
use events::EventBus;
use idempotency::IdempotencyCache;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The extractor collaborator. The default implementation calls the configured HTTP
/// endpoint; tests substitute canned outcomes.
pub trait ExtractorProvider
where
	Self: Send + Sync,
{
	fn extract<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		default_confidence: f64,
	) -> BoxFuture<'a, ExtractorOutcome>;
}

#[derive(Clone)]
pub struct Providers {
	pub extractor: Arc<dyn ExtractorProvider>,
}
impl Providers {
	pub fn new(extractor: Arc<dyn ExtractorProvider>) -> Self {
		Self { extractor }
	}
}
impl Default for Providers {
	fn default() -> Self {
		Self { extractor: Arc::new(DefaultExtractor) }
	}
}

struct DefaultExtractor;
impl ExtractorProvider for DefaultExtractor {
	fn extract<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		default_confidence: f64,
	) -> BoxFuture<'a, ExtractorOutcome> {
		Box::pin(extractor_client::extract(cfg, messages, default_confidence))
	}
}

struct ServiceInner {
	cfg: Config,
	store: Arc<dyn ProfileStore>,
	providers: Providers,
	schema: RwLock<Option<Arc<ProfileSchema>>>,
	events: EventBus,
	idempotency: IdempotencyCache,
}

/// The orchestrator. Cheap to clone; the async observe path hands a clone to the
/// background task.
#[derive(Clone)]
pub struct DossierService {
	inner: Arc<ServiceInner>,
}
impl DossierService {
	pub fn new(cfg: Config, store: Arc<dyn ProfileStore>) -> Self {
		Self::with_providers(cfg, store, Providers::default())
	}

	pub fn with_providers(
		cfg: Config,
		store: Arc<dyn ProfileStore>,
		providers: Providers,
	) -> Self {
		let idempotency = IdempotencyCache::new(&cfg.idempotency);

		Self {
			inner: Arc::new(ServiceInner {
				cfg,
				store,
				providers,
				schema: RwLock::new(None),
				events: EventBus::default(),
				idempotency,
			}),
		}
	}

	pub fn cfg(&self) -> &Config {
		&self.inner.cfg
	}

	/// Declares the fact sheet shape. Must happen before any observe or patch call.
	pub fn register_schema(&self, schema: ProfileSchema) -> Result<()> {
		schema
			.check_declaration()
			.map_err(|message| Error::SchemaInvalid { message })?;

		*self.inner.schema.write().unwrap_or_else(|err| err.into_inner()) =
			Some(Arc::new(schema));

		Ok(())
	}

	pub fn on<F>(&self, listener: F)
	where
		F: Fn(&Event) + Send + Sync + 'static,
	{
		self.inner.events.subscribe(Arc::new(listener));
	}

	pub async fn health_check(&self) -> Result<()> {
		self.inner.store.health_check().await?;

		Ok(())
	}

	pub(crate) fn schema(&self) -> Result<Arc<ProfileSchema>> {
		self.inner
			.schema
			.read()
			.unwrap_or_else(|err| err.into_inner())
			.clone()
			.ok_or(Error::SchemaNotRegistered)
	}

	pub(crate) fn extractor_cfg(&self) -> Result<LlmProviderConfig> {
		self.inner.cfg.providers.llm_extractor.clone().ok_or(Error::ExtractorNotConfigured)
	}

	pub(crate) fn store(&self) -> &dyn ProfileStore {
		self.inner.store.as_ref()
	}

	pub(crate) fn extractor(&self) -> &dyn ExtractorProvider {
		self.inner.providers.extractor.as_ref()
	}

	pub(crate) fn idempotency(&self) -> &IdempotencyCache {
		&self.inner.idempotency
	}

	pub(crate) fn emit(&self, event: &Event) {
		self.inner.events.emit(event);
	}

	pub(crate) fn now_ms() -> i64 {
		(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
	}

	/// Schema gate and extras sanitation. Stateless with respect to the stored record,
	/// so it runs once per request even when the persist step retries.
	pub(crate) fn gate(
		&self,
		schema: &ProfileSchema,
		candidates: Vec<Candidate>,
		default_source: &str,
		now_ms: i64,
	) -> GateOutcome {
		let cfg = &self.inner.cfg;
		let mut outcome = GateOutcome::default();

		for mut candidate in candidates {
			let Some(field_type) = schema.field(&candidate.field) else {
				outcome.reject(candidate, default_source, now_ms, RejectReason::UnknownField, None);

				continue;
			};

			if candidate.field == ProfileSchema::EXTRAS_FIELD {
				match extras::sanitize_extras(candidate.value, &cfg.extras, &cfg.merge) {
					Ok(clean) => {
						candidate.value = clean;

						outcome.candidates.push(candidate);
					},
					Err(reason) => {
						// The caller learns only extras_invalid, not which key failed.
						candidate.value = Value::Null;

						outcome.reject(candidate, default_source, now_ms, reason, None);
					},
				}

				continue;
			}

			candidate.value = field_type.fold_enum_case(candidate.value);

			if candidate.value.is_null() {
				// Nullability is the merge engine's rule, not the gate's.
				outcome.candidates.push(candidate);

				continue;
			}
			if let Err(violation) = field_type.validate(&candidate.value, &candidate.field) {
				outcome.reject(
					candidate,
					default_source,
					now_ms,
					RejectReason::SchemaInvalid,
					Some(violation.to_string()),
				);

				continue;
			}

			outcome.candidates.push(candidate);
		}

		outcome
	}

	/// Read, merge, conditional write; one retry from a fresh read on a concurrent
	/// write, then a persistence error carrying the attempt count.
	pub(crate) async fn merge_and_persist(
		&self,
		subject: &str,
		gate: GateOutcome,
		default_source: &str,
		skip_recency_check: bool,
	) -> Result<WriteOutcome> {
		let schema = self.schema()?;
		let policy = &self.inner.cfg.merge;
		let max_attempts: u32 = 2;

		for attempt in 0..max_attempts {
			let record = self.inner.store.get(subject).await?;
			let (current_profile, current_provenance, etag) = match &record {
				Some(record) =>
					(record.profile.clone(), record.provenance.clone(), Some(record.etag.clone())),
				None => (Map::new(), BTreeMap::new(), None),
			};
			let now_ms = Self::now_ms();
			let merged = merge(MergeArgs {
				profile: &current_profile,
				provenance: &current_provenance,
				candidates: gate.candidates.clone(),
				policy,
				is_nullable: &|field| schema.is_nullable(field),
				skip_recency_check,
				default_source,
				now_ms,
			});
			let mut history = gate.history.clone();

			history.extend(merged.history.iter().cloned());

			let mut rejected = gate.rejections.clone();

			rejected.extend(merged.rejected.iter().cloned());

			if merged.updated.is_empty() {
				// Nothing accepted: journal the rejections without a write so the etag
				// stays put.
				if !history.is_empty() {
					self.inner.store.append_history(subject, &history).await?;
				}

				return Ok(WriteOutcome {
					profile: current_profile,
					updated: Map::new(),
					rejected,
				});
			}

			let options = SetOptions { expected_etag: etag, force: false };

			match self
				.inner
				.store
				.set(subject, &merged.profile, &merged.provenance, options, &history)
				.await
			{
				Ok(_etag) => {
					let updated = merged
						.updated
						.iter()
						.filter_map(|field| {
							merged
								.profile
								.get(field)
								.map(|value| (field.clone(), value.clone()))
						})
						.collect::<Map<_, _>>();

					return Ok(WriteOutcome { profile: merged.profile, updated, rejected });
				},
				Err(err) if err.is_conflict() => {
					if attempt + 1 == max_attempts {
						return Err(Error::Persistence {
							attempts: max_attempts,
							message: err.to_string(),
						});
					}

					tracing::debug!(subject, "Concurrent write detected; retrying merge.");
				},
				Err(err) => return Err(err.into()),
			}
		}

		// The loop either returns or errors on its final attempt.
		Err(Error::Persistence {
			attempts: max_attempts,
			message: "Retry loop exhausted.".to_string(),
		})
	}

	pub(crate) fn emit_write_events(&self, subject: &str, outcome: &WriteOutcome) {
		if !outcome.updated.is_empty() {
			self.emit(&Event::Update {
				subject: subject.to_string(),
				updated: outcome.updated.clone(),
				profile: outcome.profile.clone(),
			});
		}
		if !outcome.rejected.is_empty() {
			self.emit(&Event::Conflict {
				subject: subject.to_string(),
				rejected: outcome.rejected.clone(),
			});
		}
	}
}

#[derive(Clone, Debug, Default)]
pub(crate) struct GateOutcome {
	pub(crate) candidates: Vec<Candidate>,
	pub(crate) rejections: Vec<Rejection>,
	pub(crate) history: Vec<HistoryEntry>,
}
impl GateOutcome {
	fn reject(
		&mut self,
		candidate: Candidate,
		default_source: &str,
		now_ms: i64,
		reason: RejectReason,
		detail: Option<String>,
	) {
		let source = candidate.source.clone().unwrap_or_else(|| {
			if candidate.inferred {
				"inferred".to_string()
			} else {
				default_source.to_string()
			}
		});
		let timestamp_ms = candidate.timestamp_ms.unwrap_or(now_ms);

		self.history.push(HistoryEntry {
			field: candidate.field.clone(),
			value: candidate.value.clone(),
			previous_value: None,
			source,
			timestamp_ms,
			confidence: candidate.confidence,
			inferred: candidate.inferred,
			action: HistoryAction::Rejected,
			reason: Some(reason.as_str().to_string()),
		});
		self.rejections.push(Rejection {
			field: candidate.field,
			value: candidate.value,
			reason,
			detail,
		});
	}
}

#[derive(Clone, Debug)]
pub(crate) struct WriteOutcome {
	pub(crate) profile: Map<String, Value>,
	pub(crate) updated: Map<String, Value>,
	pub(crate) rejected: Vec<Rejection>,
}
