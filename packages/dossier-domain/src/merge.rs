use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A proposed field update prior to policy evaluation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Candidate {
	pub field: String,
	pub value: Value,
	pub confidence: f64,
	#[serde(default)]
	pub inferred: bool,
	#[serde(default)]
	pub source: Option<String>,
	#[serde(default)]
	pub timestamp_ms: Option<i64>,
}

/// The metadata record accompanying every non-absent profile field.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProvenanceRecord {
	pub value: Value,
	pub source: String,
	pub timestamp_ms: i64,
	pub confidence: f64,
	pub inferred: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
	Set,
	Delete,
	Rejected,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
	SchemaInvalid,
	UnknownField,
	LowConfidence,
	LowerPriority,
	OutsideRecency,
	OlderTimestamp,
	NotNullable,
	ExtrasInvalid,
}
impl RejectReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::SchemaInvalid => "schema_invalid",
			Self::UnknownField => "unknown_field",
			Self::LowConfidence => "low_confidence",
			Self::LowerPriority => "lower_priority",
			Self::OutsideRecency => "outside_recency",
			Self::OlderTimestamp => "older_timestamp",
			Self::NotNullable => "not_nullable",
			Self::ExtrasInvalid => "extras_invalid",
		}
	}
}

/// A candidate that did not apply, with the stable reason code and optional diagnostic
/// detail from the schema gate.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Rejection {
	pub field: String,
	pub value: Value,
	pub reason: RejectReason,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

/// Append-only journal row. `previous_value` carries the profile value the row replaced
/// (or failed to replace, for rejections).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HistoryEntry {
	pub field: String,
	pub value: Value,
	pub previous_value: Option<Value>,
	pub source: String,
	pub timestamp_ms: i64,
	pub confidence: f64,
	pub inferred: bool,
	pub action: HistoryAction,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MergeOutcome {
	pub profile: Map<String, Value>,
	pub provenance: BTreeMap<String, ProvenanceRecord>,
	pub updated: Vec<String>,
	pub rejected: Vec<Rejection>,
	pub history: Vec<HistoryEntry>,
}

pub struct MergeArgs<'a> {
	pub profile: &'a Map<String, Value>,
	pub provenance: &'a BTreeMap<String, ProvenanceRecord>,
	pub candidates: Vec<Candidate>,
	pub policy: &'a dossier_config::Merge,
	pub is_nullable: &'a dyn Fn(&str) -> bool,
	/// Trusted pipelines (patch) bypass the age-based recency rejection.
	pub skip_recency_check: bool,
	/// Source assigned to candidates that carry none and are not inferred.
	pub default_source: &'a str,
	pub now_ms: i64,
}

struct Resolved {
	candidate: Candidate,
	source: String,
	priority: i32,
	timestamp_ms: i64,
}

/// Deterministic conflict resolution. Pure: the outcome depends only on the current
/// record, the batch, the policy, and `now_ms`.
pub fn merge(args: MergeArgs<'_>) -> MergeOutcome {
	let MergeArgs {
		profile,
		provenance,
		candidates,
		policy,
		is_nullable,
		skip_recency_check,
		default_source,
		now_ms,
	} = args;
	let mut ordered = candidates
		.into_iter()
		.map(|candidate| {
			let source = candidate.source.clone().unwrap_or_else(|| {
				if candidate.inferred {
					"inferred".to_string()
				} else {
					default_source.to_string()
				}
			});
			let priority = source_priority(policy, &source);
			let timestamp_ms = candidate.timestamp_ms.unwrap_or(now_ms);

			Resolved { candidate, source, priority, timestamp_ms }
		})
		.collect::<Vec<_>>();

	// Best candidate per field first; lesser same-field candidates then fail the
	// older-timestamp rule against the freshly written provenance.
	ordered.sort_by(|a, b| {
		b.priority
			.cmp(&a.priority)
			.then_with(|| b.timestamp_ms.cmp(&a.timestamp_ms))
			.then_with(|| b.candidate.confidence.total_cmp(&a.candidate.confidence))
			.then_with(|| a.candidate.field.cmp(&b.candidate.field))
	});

	let mut outcome = MergeOutcome {
		profile: profile.clone(),
		provenance: provenance.clone(),
		..Default::default()
	};

	for resolved in ordered {
		apply_candidate(&mut outcome, resolved, policy, is_nullable, skip_recency_check);
	}

	outcome
}

fn apply_candidate(
	outcome: &mut MergeOutcome,
	resolved: Resolved,
	policy: &dossier_config::Merge,
	is_nullable: &dyn Fn(&str) -> bool,
	skip_recency_check: bool,
) {
	let Resolved { candidate, source, priority, timestamp_ms } = resolved;
	let field = candidate.field.clone();

	if candidate.confidence < policy.min_confidence {
		reject(outcome, candidate, &source, timestamp_ms, RejectReason::LowConfidence);

		return;
	}
	if let Some(existing) = outcome.provenance.get(&field) {
		let existing_priority = source_priority(policy, &existing.source);

		if !skip_recency_check
			&& priority <= existing_priority
			&& timestamp_ms <= existing.timestamp_ms
			&& existing.timestamp_ms - timestamp_ms >= policy.recency_window_ms
		{
			reject(outcome, candidate, &source, timestamp_ms, RejectReason::OutsideRecency);

			return;
		}
		if priority == existing_priority && timestamp_ms < existing.timestamp_ms {
			reject(outcome, candidate, &source, timestamp_ms, RejectReason::OlderTimestamp);

			return;
		}
		if priority < existing_priority {
			reject(outcome, candidate, &source, timestamp_ms, RejectReason::LowerPriority);

			return;
		}
	}
	if candidate.value.is_null() && !is_nullable(&field) {
		reject(outcome, candidate, &source, timestamp_ms, RejectReason::NotNullable);

		return;
	}

	let value = truncate_string(candidate.value, policy.max_field_length);
	let previous_value = outcome.profile.get(&field).cloned();
	let action = if value.is_null() { HistoryAction::Delete } else { HistoryAction::Set };

	outcome.history.push(HistoryEntry {
		field: field.clone(),
		value: value.clone(),
		previous_value,
		source: source.clone(),
		timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
		action,
		reason: None,
	});
	outcome.profile.insert(field.clone(), value.clone());
	outcome.provenance.insert(field.clone(), ProvenanceRecord {
		value,
		source,
		timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
	});
	outcome.updated.push(field);
}

fn reject(
	outcome: &mut MergeOutcome,
	candidate: Candidate,
	source: &str,
	timestamp_ms: i64,
	reason: RejectReason,
) {
	outcome.history.push(HistoryEntry {
		field: candidate.field.clone(),
		value: candidate.value.clone(),
		previous_value: outcome.profile.get(&candidate.field).cloned(),
		source: source.to_string(),
		timestamp_ms,
		confidence: candidate.confidence,
		inferred: candidate.inferred,
		action: HistoryAction::Rejected,
		reason: Some(reason.as_str().to_string()),
	});
	outcome.rejected.push(Rejection {
		field: candidate.field,
		value: candidate.value,
		reason,
		detail: None,
	});
}

pub fn source_priority(policy: &dossier_config::Merge, source: &str) -> i32 {
	policy.source_priority.get(source).copied().unwrap_or(0)
}

fn truncate_string(value: Value, max_chars: usize) -> Value {
	let Value::String(text) = &value else {
		return value;
	};

	if text.chars().count() <= max_chars {
		return value;
	}

	Value::String(text.chars().take(max_chars).collect())
}
