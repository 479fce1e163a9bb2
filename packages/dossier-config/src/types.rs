use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub merge: Merge,
	pub extras: Extras,
	pub idempotency: Idempotency,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Service {
	pub log_level: String,
}
impl Default for Service {
	fn default() -> Self {
		Self { log_level: "info".to_string() }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Storage {
	/// One of "memory", "postgres", or "redis".
	pub backend: String,
	pub memory: MemoryStorage,
	pub postgres: Option<Postgres>,
	pub redis: Option<Redis>,
}
impl Default for Storage {
	fn default() -> Self {
		Self {
			backend: "memory".to_string(),
			memory: MemoryStorage::default(),
			postgres: None,
			redis: None,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemoryStorage {
	pub max_history: usize,
}
impl Default for MemoryStorage {
	fn default() -> Self {
		Self { max_history: 1_000 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	#[serde(default = "default_pool_max_conns")]
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Redis {
	pub url: String,
	#[serde(default = "default_redis_key_prefix")]
	pub key_prefix: String,
	/// Zero disables expiry. Refreshed only by successful writes.
	#[serde(default)]
	pub ttl_seconds: u64,
	#[serde(default = "default_redis_max_history")]
	pub max_history: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Providers {
	pub llm_extractor: Option<LlmProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_max_input_chars")]
	pub max_input_chars: usize,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Merge {
	pub source_priority: HashMap<String, i32>,
	pub min_confidence: f64,
	pub recency_window_ms: i64,
	pub max_field_length: usize,
	pub extras_max_keys: usize,
}
impl Default for Merge {
	fn default() -> Self {
		Self {
			source_priority: default_source_priority(),
			min_confidence: 0.5,
			recency_window_ms: 86_400_000,
			max_field_length: 512,
			extras_max_keys: 50,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Extras {
	pub key_pattern: String,
	pub max_key_length: usize,
	pub max_string_length: usize,
	pub max_array_length: usize,
	pub max_nesting_depth: u32,
	pub allow_arrays: bool,
	pub allow_nested_objects: bool,
}
impl Default for Extras {
	fn default() -> Self {
		Self {
			key_pattern: r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$".to_string(),
			max_key_length: 64,
			max_string_length: 512,
			max_array_length: 20,
			max_nesting_depth: 2,
			allow_arrays: true,
			allow_nested_objects: true,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Idempotency {
	pub ttl_ms: u64,
	pub max_entries: usize,
}
impl Default for Idempotency {
	fn default() -> Self {
		Self { ttl_ms: 300_000, max_entries: 1_000 }
	}
}

pub fn default_source_priority() -> HashMap<String, i32> {
	HashMap::from([
		("crm".to_string(), 3),
		("manual".to_string(), 2),
		("observe".to_string(), 1),
		("inferred".to_string(), 0),
	])
}

fn default_pool_max_conns() -> u32 {
	5
}

fn default_redis_key_prefix() -> String {
	"dossier".to_string()
}

fn default_redis_max_history() -> usize {
	1_000
}

fn default_temperature() -> f32 {
	0.1
}

fn default_timeout_ms() -> u64 {
	5_000
}

fn default_max_retries() -> u32 {
	2
}

fn default_max_input_chars() -> usize {
	8_000
}
