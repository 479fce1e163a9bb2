use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use dossier_domain::merge::{Candidate, Rejection};

use crate::{
	DossierService, Error, Result,
	idempotency::{CachedResponse, IdempotencyCache},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PatchRequest {
	pub subject: String,
	pub facts: Map<String, Value>,
	#[serde(default)]
	pub source: Option<String>,
	#[serde(default)]
	pub confidence: Option<f64>,
	/// Backfills may stamp facts with their original time instead of the server clock.
	#[serde(default)]
	pub timestamp_ms: Option<i64>,
	#[serde(default)]
	pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PatchResponse {
	pub profile: Map<String, Value>,
	pub updated: Map<String, Value>,
	pub rejected: Vec<Rejection>,
}

impl DossierService {
	/// Applies caller-supplied trusted facts directly. Human and CRM writes bypass the
	/// recency rejection so backfills always land; the priority and timestamp rules
	/// still apply.
	pub async fn patch(&self, req: PatchRequest) -> Result<PatchResponse> {
		if req.subject.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "subject is required.".to_string() });
		}
		if req.facts.is_empty() {
			return Err(Error::InvalidRequest { message: "facts must be non-empty.".to_string() });
		}

		let schema = self.schema()?;
		let cache_key = req
			.idempotency_key
			.as_deref()
			.map(|key| IdempotencyCache::key("patch", &req.subject, key));

		if let Some(key) = cache_key.as_deref()
			&& let Some(CachedResponse::Patch(prior)) = self.idempotency().get(key)
		{
			return Ok(prior);
		}

		let confidence = req.confidence.unwrap_or(1.0);
		let candidates = req
			.facts
			.iter()
			.map(|(field, value)| Candidate {
				field: field.clone(),
				value: value.clone(),
				confidence,
				inferred: false,
				source: None,
				timestamp_ms: req.timestamp_ms,
			})
			.collect::<Vec<_>>();
		let default_source = req.source.clone().unwrap_or_else(|| "manual".to_string());
		let gate = self.gate(&schema, candidates, &default_source, Self::now_ms());
		let write = self.merge_and_persist(&req.subject, gate, &default_source, true).await?;

		self.emit_write_events(&req.subject, &write);

		let response = PatchResponse {
			profile: write.profile,
			updated: write.updated,
			rejected: write.rejected,
		};

		if let Some(key) = cache_key {
			self.idempotency().insert(key, CachedResponse::Patch(response.clone()));
		}

		Ok(response)
	}
}
