use regex::Regex;
use serde_json::{Map, Value};

use crate::merge::RejectReason;

/// Sanitizes the free-form `extras` map. Invalid keys and values are dropped silently;
/// a non-map candidate or a map with nothing left after sanitization rejects the whole
/// field as `extras_invalid`. A `null` candidate passes through untouched (the merge
/// nullability rule decides its fate).
pub fn sanitize_extras(
	value: Value,
	policy: &dossier_config::Extras,
	merge_policy: &dossier_config::Merge,
) -> Result<Value, RejectReason> {
	if value.is_null() {
		return Ok(value);
	}

	let Value::Object(map) = value else {
		return Err(RejectReason::ExtrasInvalid);
	};
	let key_pattern = Regex::new(&policy.key_pattern).ok();
	let max_string_chars = policy.max_string_length.min(merge_policy.max_field_length);
	let mut out = Map::new();

	for (key, child) in map {
		if out.len() >= merge_policy.extras_max_keys {
			break;
		}
		if key.chars().count() > policy.max_key_length {
			continue;
		}
		if !key_pattern.as_ref().map(|re| re.is_match(&key)).unwrap_or(false) {
			continue;
		}
		if let Some(clean) = sanitize_value(child, 1, policy, max_string_chars) {
			out.insert(key, clean);
		}
	}

	if out.is_empty() {
		return Err(RejectReason::ExtrasInvalid);
	}

	Ok(Value::Object(out))
}

fn sanitize_value(
	value: Value,
	depth: u32,
	policy: &dossier_config::Extras,
	max_string_chars: usize,
) -> Option<Value> {
	match value {
		Value::String(text) =>
			if text.chars().count() > max_string_chars {
				Some(Value::String(text.chars().take(max_string_chars).collect()))
			} else {
				Some(Value::String(text))
			},
		Value::Number(number) =>
			if number.as_f64().map(f64::is_finite).unwrap_or(false) {
				Some(Value::Number(number))
			} else {
				None
			},
		Value::Bool(flag) => Some(Value::Bool(flag)),
		Value::Array(items) => {
			if !policy.allow_arrays || depth >= policy.max_nesting_depth {
				return None;
			}

			let clean = items
				.into_iter()
				.take(policy.max_array_length)
				.filter_map(|item| sanitize_value(item, depth + 1, policy, max_string_chars))
				.collect::<Vec<_>>();

			Some(Value::Array(clean))
		},
		Value::Object(map) => {
			if !policy.allow_nested_objects || depth >= policy.max_nesting_depth {
				return None;
			}

			let key_pattern = Regex::new(&policy.key_pattern).ok();
			let mut out = Map::new();

			for (key, child) in map {
				if key.chars().count() > policy.max_key_length {
					continue;
				}
				if !key_pattern.as_ref().map(|re| re.is_match(&key)).unwrap_or(false) {
					continue;
				}
				if let Some(clean) = sanitize_value(child, depth + 1, policy, max_string_chars) {
					out.insert(key, clean);
				}
			}

			Some(Value::Object(out))
		},
		Value::Null => None,
	}
}
