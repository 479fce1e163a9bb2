mod error;
mod types;

use std::{fs, path::Path};

pub use error::{Error, Result};
pub use types::{
	Config, Extras, Idempotency, LlmProviderConfig, MemoryStorage, Merge, Postgres, Providers,
	Redis, Service, Storage, default_source_priority,
};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|source| Error::ReadConfig { path: path.to_path_buf(), source })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|source| Error::ParseConfig { path: path.to_path_buf(), source })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

fn normalize(cfg: &mut Config) {
	if let Some(redis) = cfg.storage.redis.as_mut()
		&& redis.key_prefix.trim().is_empty()
	{
		redis.key_prefix = "dossier".to_string();
	}

	// Unlisted sources merge at priority zero, but the four canonical sources keep their
	// documented ranks unless the operator overrides them explicitly.
	for (source, priority) in default_source_priority() {
		cfg.merge.source_priority.entry(source).or_insert(priority);
	}
}

pub fn validate(cfg: &Config) -> Result<()> {
	if !matches!(cfg.storage.backend.as_str(), "memory" | "postgres" | "redis") {
		return Err(validation("storage.backend must be one of memory, postgres, or redis."));
	}
	if cfg.storage.backend == "postgres" {
		let Some(postgres) = cfg.storage.postgres.as_ref() else {
			return Err(validation("storage.postgres is required when the backend is postgres."));
		};

		if postgres.dsn.trim().is_empty() {
			return Err(validation("storage.postgres.dsn must be non-empty."));
		}
		if postgres.pool_max_conns == 0 {
			return Err(validation("storage.postgres.pool_max_conns must be greater than zero."));
		}
	}
	if cfg.storage.backend == "redis" {
		let Some(redis) = cfg.storage.redis.as_ref() else {
			return Err(validation("storage.redis is required when the backend is redis."));
		};

		if redis.url.trim().is_empty() {
			return Err(validation("storage.redis.url must be non-empty."));
		}
		if redis.max_history == 0 {
			return Err(validation("storage.redis.max_history must be greater than zero."));
		}
	}
	if cfg.storage.memory.max_history == 0 {
		return Err(validation("storage.memory.max_history must be greater than zero."));
	}
	if !(0.0..=1.0).contains(&cfg.merge.min_confidence) {
		return Err(validation("merge.min_confidence must be in the range 0.0-1.0."));
	}
	if cfg.merge.recency_window_ms < 0 {
		return Err(validation("merge.recency_window_ms must be zero or greater."));
	}
	if cfg.merge.max_field_length == 0 {
		return Err(validation("merge.max_field_length must be greater than zero."));
	}
	if cfg.merge.extras_max_keys == 0 {
		return Err(validation("merge.extras_max_keys must be greater than zero."));
	}

	for (source, priority) in &cfg.merge.source_priority {
		if source.trim().is_empty() {
			return Err(validation("merge.source_priority keys must be non-empty."));
		}
		if *priority < 0 {
			return Err(validation("merge.source_priority values must be zero or greater."));
		}
	}

	if regex::Regex::new(&cfg.extras.key_pattern).is_err() {
		return Err(validation("extras.key_pattern must be a valid regular expression."));
	}
	if cfg.extras.max_key_length == 0 {
		return Err(validation("extras.max_key_length must be greater than zero."));
	}
	if cfg.extras.max_string_length == 0 {
		return Err(validation("extras.max_string_length must be greater than zero."));
	}
	if cfg.extras.max_nesting_depth == 0 {
		return Err(validation("extras.max_nesting_depth must be greater than zero."));
	}
	if cfg.idempotency.ttl_ms == 0 {
		return Err(validation("idempotency.ttl_ms must be greater than zero."));
	}
	if cfg.idempotency.max_entries == 0 {
		return Err(validation("idempotency.max_entries must be greater than zero."));
	}
	if let Some(extractor) = cfg.providers.llm_extractor.as_ref() {
		if extractor.api_base.trim().is_empty() {
			return Err(validation("providers.llm_extractor.api_base must be non-empty."));
		}
		if extractor.api_key.trim().is_empty() {
			return Err(validation("providers.llm_extractor.api_key must be non-empty."));
		}
		if extractor.model.trim().is_empty() {
			return Err(validation("providers.llm_extractor.model must be non-empty."));
		}
		if !extractor.temperature.is_finite() {
			return Err(validation("providers.llm_extractor.temperature must be a finite number."));
		}
		if extractor.timeout_ms == 0 {
			return Err(validation("providers.llm_extractor.timeout_ms must be greater than zero."));
		}
		if extractor.max_input_chars == 0 {
			return Err(validation(
				"providers.llm_extractor.max_input_chars must be greater than zero.",
			));
		}
	}

	Ok(())
}

fn validation(message: &str) -> Error {
	Error::Validation { message: message.to_string() }
}
