use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dossier_config::LlmProviderConfig;
use dossier_domain::merge::Candidate;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	ApiError,
	ParseError,
	Timeout,
	NetworkError,
}

/// Structured extractor failure. `retryable` drives both the client's own retry loop and
/// the caller's `on_error` handling.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExtractorFailure {
	pub kind: FailureKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<u16>,
	pub message: String,
	pub retryable: bool,
}

/// What the collaborator hands back. Candidates are empty whenever `error` is set; the
/// merge then proceeds as a no-op.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtractorOutcome {
	pub candidates: Vec<Candidate>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub raw_response: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub latency_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ExtractorFailure>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
	field: String,
	value: Value,
	confidence: Option<f64>,
	#[serde(default)]
	inferred: bool,
	#[serde(default)]
	source: Option<String>,
	#[serde(default)]
	timestamp_ms: Option<i64>,
}

#[derive(Deserialize)]
struct RawCandidateList {
	candidates: Vec<RawCandidate>,
}

/// Assembles the chat messages for one extraction call. The schema descriptor tells the
/// model exactly which fields exist and what shapes they take.
pub fn build_messages(
	input: &str,
	output: Option<&str>,
	schema_descriptor: &Value,
	context: Option<&str>,
) -> Vec<Value> {
	let mut system = String::from(
		"You extract profile facts about the subject from conversation text. \
		 Respond with a single JSON object of the form \
		 {\"candidates\": [{\"field\", \"value\", \"confidence\", \"inferred\"}]}. \
		 Only use fields declared in the schema. Confidence is a number between 0 and 1. \
		 Mark a candidate as inferred when the subject did not state it explicitly. \
		 Schema: ",
	);

	system.push_str(&schema_descriptor.to_string());

	if let Some(context) = context {
		system.push_str("\nContext: ");
		system.push_str(context);
	}

	let mut user = format!("Subject said:\n{input}");

	if let Some(output) = output {
		user.push_str("\n\nAssistant replied:\n");
		user.push_str(output);
	}

	vec![
		serde_json::json!({ "role": "system", "content": system }),
		serde_json::json!({ "role": "user", "content": user }),
	]
}

/// Calls the extractor endpoint with bounded retries and a per-attempt timeout. Never
/// returns `Err`: failures are folded into the outcome so the merge pipeline can proceed
/// with zero candidates.
pub async fn extract(
	cfg: &LlmProviderConfig,
	messages: &[Value],
	default_confidence: f64,
) -> ExtractorOutcome {
	let started = Instant::now();
	let client = match Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build() {
		Ok(client) => client,
		Err(err) => {
			return failure_outcome(
				ExtractorFailure {
					kind: FailureKind::NetworkError,
					status: None,
					message: redact(&err.to_string(), &cfg.api_key),
					retryable: false,
				},
				started,
			);
		},
	};
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let mut last_failure = None;

	for _ in 0..=cfg.max_retries {
		match attempt(cfg, &client, &url, messages).await {
			Ok((raw, candidates)) => {
				let latency_ms = started.elapsed().as_millis() as u64;
				let candidates = candidates
					.into_iter()
					.map(|raw| Candidate {
						field: raw.field,
						value: raw.value,
						confidence: raw.confidence.unwrap_or(default_confidence),
						inferred: raw.inferred,
						source: raw.source,
						timestamp_ms: raw.timestamp_ms,
					})
					.collect();

				return ExtractorOutcome {
					candidates,
					raw_response: Some(raw),
					latency_ms: Some(latency_ms),
					error: None,
				};
			},
			Err(failure) => {
				let retryable = failure.retryable;

				last_failure = Some(failure);

				if !retryable {
					break;
				}
			},
		}
	}

	let failure = last_failure.unwrap_or(ExtractorFailure {
		kind: FailureKind::NetworkError,
		status: None,
		message: "Extractor produced no response.".to_string(),
		retryable: false,
	});

	failure_outcome(failure, started)
}

async fn attempt(
	cfg: &LlmProviderConfig,
	client: &Client,
	url: &str,
	messages: &[Value],
) -> Result<(Value, Vec<RawCandidate>), ExtractorFailure> {
	let headers = crate::auth_headers(&cfg.api_key, &cfg.default_headers).map_err(|err| {
		ExtractorFailure {
			kind: FailureKind::NetworkError,
			status: None,
			message: redact(&err.to_string(), &cfg.api_key),
			retryable: false,
		}
	})?;
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let response = client
		.post(url)
		.headers(headers)
		.json(&body)
		.send()
		.await
		.map_err(|err| classify_transport_error(&err, &cfg.api_key))?;
	let status = response.status();
	let text = response.text().await.map_err(|err| classify_transport_error(&err, &cfg.api_key))?;

	if !status.is_success() {
		return Err(ExtractorFailure {
			kind: FailureKind::ApiError,
			status: Some(status.as_u16()),
			message: redact(&format!("Extractor returned {status}: {text}"), &cfg.api_key),
			retryable: is_retryable_status(status),
		});
	}

	let raw: Value = serde_json::from_str(&text).map_err(|err| ExtractorFailure {
		kind: FailureKind::ParseError,
		status: Some(status.as_u16()),
		message: redact(&format!("Extractor response is not JSON: {err}"), &cfg.api_key),
		retryable: false,
	})?;
	let candidates = parse_candidates(&raw).map_err(|mut failure| {
		failure.message = redact(&failure.message, &cfg.api_key);

		failure
	})?;

	Ok((raw, candidates))
}

fn parse_candidates(raw: &Value) -> Result<Vec<RawCandidate>, ExtractorFailure> {
	// Chat completion shape first, bare candidate object as a fallback.
	let payload = raw
		.get("choices")
		.and_then(|choices| choices.as_array())
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|message| message.get("content"))
		.and_then(|content| content.as_str())
		.map(serde_json::from_str::<Value>)
		.transpose()
		.map_err(|err| parse_failure(format!("Extractor content is not JSON: {err}")))?
		.unwrap_or_else(|| raw.clone());

	if !payload.is_object() {
		return Err(parse_failure("Extractor response is missing a candidate object.".to_string()));
	}

	let list: RawCandidateList = serde_json::from_value(payload)
		.map_err(|err| parse_failure(format!("Extractor candidates are malformed: {err}")))?;

	Ok(list.candidates)
}

fn parse_failure(message: String) -> ExtractorFailure {
	ExtractorFailure { kind: FailureKind::ParseError, status: None, message, retryable: false }
}

fn classify_transport_error(err: &reqwest::Error, api_key: &str) -> ExtractorFailure {
	if err.is_timeout() {
		return ExtractorFailure {
			kind: FailureKind::Timeout,
			status: None,
			message: redact(&err.to_string(), api_key),
			retryable: true,
		};
	}

	ExtractorFailure {
		kind: FailureKind::NetworkError,
		status: err.status().map(|status| status.as_u16()),
		message: redact(&err.to_string(), api_key),
		retryable: true,
	}
}

fn is_retryable_status(status: StatusCode) -> bool {
	status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// The API key never leaves the process inside an error payload.
fn redact(message: &str, api_key: &str) -> String {
	if api_key.is_empty() {
		return message.to_string();
	}

	message.replace(api_key, "[REDACTED]")
}

fn failure_outcome(failure: ExtractorFailure, started: Instant) -> ExtractorOutcome {
	ExtractorOutcome {
		candidates: Vec::new(),
		raw_response: None,
		latency_ms: Some(started.elapsed().as_millis() as u64),
		error: Some(failure),
	}
}
