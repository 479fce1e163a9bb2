use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use dossier_domain::{merge::Rejection, text};
use dossier_providers::extractor as extractor_client;

use crate::{
	DossierService, Error, Event, Result,
	idempotency::{CachedResponse, IdempotencyCache},
};

const DEFAULT_OBSERVE_CONFIDENCE: f64 = 0.7;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveMode {
	#[default]
	Sync,
	Async,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFrom {
	#[default]
	Input,
	Output,
	Both,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
	#[default]
	Skip,
	Throw,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ObserveRequest {
	pub subject: String,
	pub input: String,
	#[serde(default)]
	pub output: Option<String>,
	#[serde(default)]
	pub source: Option<String>,
	#[serde(default)]
	pub confidence: Option<f64>,
	#[serde(default)]
	pub idempotency_key: Option<String>,
	#[serde(default)]
	pub mode: ObserveMode,
	#[serde(default)]
	pub extract_from: ExtractFrom,
	#[serde(default)]
	pub on_error: OnError,
	#[serde(default)]
	pub context: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ObserveResponse {
	pub profile: Map<String, Value>,
	pub updated: Map<String, Value>,
	pub rejected: Vec<Rejection>,
	pub extracted: Map<String, Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub raw_response: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub latency_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queued: Option<bool>,
	pub request_id: String,
}

impl DossierService {
	/// Feeds conversational text through the extractor and merges the resulting
	/// candidates. In async mode the returned profile is a snapshot taken before the
	/// background pipeline is dispatched.
	pub async fn observe(&self, req: ObserveRequest) -> Result<ObserveResponse> {
		if req.subject.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "subject is required.".to_string() });
		}

		// Fail fast on configuration mistakes before touching storage.
		self.schema()?;
		self.extractor_cfg()?;

		let cache_key = req
			.idempotency_key
			.as_deref()
			.map(|key| IdempotencyCache::key("observe", &req.subject, key));

		if let Some(key) = cache_key.as_deref()
			&& let Some(CachedResponse::Observe(prior)) = self.idempotency().get(key)
		{
			return Ok(prior);
		}

		let request_id = Uuid::new_v4().to_string();

		match req.mode {
			ObserveMode::Sync => {
				let response = self.run_observe_pipeline(&req, &request_id).await?;

				if let Some(key) = cache_key {
					self.idempotency().insert(key, CachedResponse::Observe(response.clone()));
				}

				Ok(response)
			},
			ObserveMode::Async => {
				// Snapshot before dispatch: the caller must never see a profile newer
				// than the background merge's base.
				let snapshot = self
					.store()
					.get(&req.subject)
					.await?
					.map(|record| record.profile)
					.unwrap_or_default();
				let response = ObserveResponse {
					profile: snapshot,
					updated: Map::new(),
					rejected: Vec::new(),
					extracted: Map::new(),
					raw_response: None,
					latency_ms: None,
					queued: Some(true),
					request_id: request_id.clone(),
				};

				if let Some(key) = cache_key {
					self.idempotency().insert(key, CachedResponse::Observe(response.clone()));
				}

				let service = self.clone();
				let background_id = request_id;

				tokio::spawn(async move {
					let subject = req.subject.clone();

					match service.run_observe_pipeline(&req, &background_id).await {
						Ok(result) => {
							service.emit(&Event::ObserveComplete {
								subject,
								request_id: background_id,
								result: Some(result),
								error: None,
							});
						},
						Err(err) => {
							tracing::warn!(error = %err, "Background observe failed.");
							service.emit(&Event::ObserveComplete {
								subject,
								request_id: background_id,
								result: None,
								error: Some(err.to_string()),
							});
						},
					}
				});

				Ok(response)
			},
		}
	}

	async fn run_observe_pipeline(
		&self,
		req: &ObserveRequest,
		request_id: &str,
	) -> Result<ObserveResponse> {
		let schema = self.schema()?;
		let extractor_cfg = self.extractor_cfg()?;
		let input = text::sanitize_text(&req.input, extractor_cfg.max_input_chars);
		let output = req
			.output
			.as_deref()
			.map(|raw| text::sanitize_text(raw, extractor_cfg.max_input_chars));
		let (primary, secondary) = match req.extract_from {
			ExtractFrom::Input => (input.as_str(), None),
			ExtractFrom::Output => (output.as_deref().unwrap_or(""), None),
			ExtractFrom::Both => (input.as_str(), output.as_deref()),
		};
		let messages = extractor_client::build_messages(
			primary,
			secondary,
			&schema.descriptor(),
			req.context.as_deref(),
		);
		let default_confidence = req.confidence.unwrap_or(DEFAULT_OBSERVE_CONFIDENCE);
		let outcome =
			self.extractor().extract(&extractor_cfg, &messages, default_confidence).await;

		if let Some(failure) = &outcome.error {
			if matches!(req.on_error, OnError::Throw) {
				return Err(Error::Extractor {
					message: failure.message.clone(),
					retryable: failure.retryable,
				});
			}

			tracing::warn!(error = %failure.message, "Extractor failed; merging zero candidates.");
		}

		let extracted = outcome
			.candidates
			.iter()
			.map(|candidate| (candidate.field.clone(), candidate.value.clone()))
			.collect::<Map<_, _>>();
		let default_source = req.source.clone().unwrap_or_else(|| "observe".to_string());
		let gate =
			self.gate(&schema, outcome.candidates, &default_source, Self::now_ms());
		let write = self.merge_and_persist(&req.subject, gate, &default_source, false).await?;

		self.emit_write_events(&req.subject, &write);

		Ok(ObserveResponse {
			profile: write.profile,
			updated: write.updated,
			rejected: write.rejected,
			extracted,
			raw_response: outcome.raw_response,
			latency_ms: outcome.latency_ms,
			queued: None,
			request_id: request_id.to_string(),
		})
	}
}
