use std::collections::BTreeMap;

use redis::{AsyncCommands, Script, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use dossier_domain::merge::{HistoryEntry, ProvenanceRecord};

use crate::{
	BoxFuture, Error, ProfileStore, Result,
	models::{HistoryPage, HistoryQuery, SetOptions, StoredRecord},
};

// Version check, conditional write, history append, retention trim, and TTL refresh in
// one server-side step. TTLs move only on successful writes.
const SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[3])
if ARGV[1] ~= '' then
	if not current or current ~= ARGV[1] then
		return {'CONFLICT', current or ''}
	end
elseif current and ARGV[2] ~= '1' then
	return {'CONFLICT', current}
end
local version = 1
if current then
	version = tonumber(current) + 1
end
redis.call('SET', KEYS[1], ARGV[3])
redis.call('SET', KEYS[2], ARGV[4])
redis.call('SET', KEYS[3], tostring(version))
local entries = tonumber(ARGV[7])
for i = 0, entries - 1 do
	redis.call('ZADD', KEYS[4], tonumber(ARGV[8 + i * 2]), ARGV[9 + i * 2])
end
local max_history = tonumber(ARGV[5])
local count = redis.call('ZCARD', KEYS[4])
if count > max_history then
	redis.call('ZREMRANGEBYRANK', KEYS[4], 0, count - max_history - 1)
end
local ttl = tonumber(ARGV[6])
if ttl > 0 then
	redis.call('EXPIRE', KEYS[1], ttl)
	redis.call('EXPIRE', KEYS[2], ttl)
	redis.call('EXPIRE', KEYS[3], ttl)
	redis.call('EXPIRE', KEYS[4], ttl)
end
return {'OK', tostring(version)}
"#;

const APPEND_SCRIPT: &str = r#"
local entries = tonumber(ARGV[2])
for i = 0, entries - 1 do
	redis.call('ZADD', KEYS[1], tonumber(ARGV[3 + i * 2]), ARGV[4 + i * 2])
end
local max_history = tonumber(ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count > max_history then
	redis.call('ZREMRANGEBYRANK', KEYS[1], 0, count - max_history - 1)
end
return count
"#;

const DELETE_SCRIPT: &str = r#"
local existed = redis.call('EXISTS', KEYS[3])
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3], KEYS[4])
return existed
"#;

/// Sorted-set members need a unique identity; two identical journal rows in one batch
/// would otherwise collapse into a single member.
#[derive(Deserialize, Serialize)]
struct HistoryMember {
	id: String,
	entry: HistoryEntry,
}

/// Scripted key-value adapter. Four keys per subject: profile, provenance, meta
/// (version counter), and a history sorted set scored by `timestamp_ms` (the cursor).
pub struct RedisStore {
	manager: ConnectionManager,
	key_prefix: String,
	ttl_seconds: u64,
	max_history: usize,
	set_script: Script,
	append_script: Script,
	delete_script: Script,
}
impl RedisStore {
	pub async fn connect(cfg: &dossier_config::Redis) -> Result<Self> {
		let client = redis::Client::open(cfg.url.as_str())?;
		let manager = client.get_connection_manager().await?;

		Ok(Self {
			manager,
			key_prefix: cfg.key_prefix.clone(),
			ttl_seconds: cfg.ttl_seconds,
			max_history: cfg.max_history,
			set_script: Script::new(SET_SCRIPT),
			append_script: Script::new(APPEND_SCRIPT),
			delete_script: Script::new(DELETE_SCRIPT),
		})
	}

	fn keys(&self, subject: &str) -> [String; 4] {
		let base = format!("{}:{subject}", self.key_prefix);

		[
			format!("{base}:profile"),
			format!("{base}:provenance"),
			format!("{base}:meta"),
			format!("{base}:history"),
		]
	}
}
impl ProfileStore for RedisStore {
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>> {
		Box::pin(async move {
			let [profile_key, provenance_key, meta_key, _] = self.keys(subject);
			let mut conn = self.manager.clone();
			let (profile, provenance, version): (
				Option<String>,
				Option<String>,
				Option<String>,
			) = conn.mget((&profile_key, &provenance_key, &meta_key)).await?;
			let Some(version) = version else {
				return Ok(None);
			};
			let profile: Map<String, Value> = match profile {
				Some(raw) => serde_json::from_str(&raw)?,
				None => Map::new(),
			};
			let provenance: BTreeMap<String, ProvenanceRecord> = match provenance {
				Some(raw) => serde_json::from_str(&raw)?,
				None => BTreeMap::new(),
			};

			Ok(Some(StoredRecord { profile, provenance, etag: version }))
		})
	}

	fn set<'a>(
		&'a self,
		subject: &'a str,
		profile: &'a Map<String, Value>,
		provenance: &'a BTreeMap<String, ProvenanceRecord>,
		options: SetOptions,
		history: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			let [profile_key, provenance_key, meta_key, history_key] = self.keys(subject);
			let profile_json = serde_json::to_string(&Value::Object(profile.clone()))?;
			let provenance_json = serde_json::to_string(provenance)?;
			let mut invocation = self.set_script.prepare_invoke();

			invocation
				.key(profile_key)
				.key(provenance_key)
				.key(meta_key)
				.key(history_key)
				.arg(options.expected_etag.as_deref().unwrap_or(""))
				.arg(if options.force { "1" } else { "0" })
				.arg(profile_json)
				.arg(provenance_json)
				.arg(self.max_history)
				.arg(self.ttl_seconds)
				.arg(history.len());

			for entry in history {
				invocation.arg(entry.timestamp_ms).arg(encode_member(entry)?);
			}

			let mut conn = self.manager.clone();
			let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

			match reply.first().map(String::as_str) {
				Some("OK") => Ok(reply.get(1).cloned().unwrap_or_default()),
				Some("CONFLICT") => {
					let current = reply.get(1).cloned().unwrap_or_default();

					Err(Error::Conflict(format!(
						"Version mismatch for {subject}: current {current:?}."
					)))
				},
				_ => Err(Error::InvalidArgument(format!(
					"Unexpected script reply for {subject}: {reply:?}."
				))),
			}
		})
	}

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if entries.is_empty() {
				return Ok(());
			}

			let [_, _, _, history_key] = self.keys(subject);
			let mut invocation = self.append_script.prepare_invoke();

			invocation.key(history_key).arg(self.max_history).arg(entries.len());

			for entry in entries {
				invocation.arg(entry.timestamp_ms).arg(encode_member(entry)?);
			}

			let mut conn = self.manager.clone();
			let _: i64 = invocation.invoke_async(&mut conn).await?;

			Ok(())
		})
	}

	fn history<'a>(
		&'a self,
		subject: &'a str,
		query: HistoryQuery,
	) -> BoxFuture<'a, Result<HistoryPage>> {
		Box::pin(async move {
			let after = match query.cursor.as_deref() {
				Some(raw) => {
					let score = raw.parse::<i64>().map_err(|_| {
						Error::InvalidArgument(format!("Cursor {raw:?} is not a score."))
					})?;

					format!("({score}")
				},
				None => "-inf".to_string(),
			};
			let [_, _, _, history_key] = self.keys(subject);
			let mut cmd = redis::cmd("ZRANGEBYSCORE");

			cmd.arg(&history_key).arg(&after).arg("+inf");

			// A field filter shrinks pages client-side, so only unfiltered queries can
			// lean on the server-side LIMIT.
			if query.field.is_none() {
				cmd.arg("LIMIT").arg(0).arg(query.limit as i64 + 1);
			}

			let mut conn = self.manager.clone();
			let members: Vec<String> = cmd.query_async(&mut conn).await?;
			let mut matching = Vec::with_capacity(members.len());

			for member in members {
				let decoded: HistoryMember = serde_json::from_str(&member)?;

				if query
					.field
					.as_deref()
					.map(|field| decoded.entry.field == field)
					.unwrap_or(true)
				{
					matching.push(decoded.entry);
				}
			}

			let limit = query.limit as usize;
			let has_more = matching.len() > limit;
			let entries = matching.into_iter().take(limit).collect::<Vec<_>>();
			let next_cursor = if has_more {
				entries.last().map(|entry| entry.timestamp_ms.to_string())
			} else {
				None
			};

			Ok(HistoryPage { entries, next_cursor })
		})
	}

	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let [profile_key, provenance_key, meta_key, history_key] = self.keys(subject);
			let mut conn = self.manager.clone();
			let existed: i64 = self
				.delete_script
				.key(profile_key)
				.key(provenance_key)
				.key(meta_key)
				.key(history_key)
				.invoke_async(&mut conn)
				.await?;

			Ok(existed > 0)
		})
	}

	fn health_check(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let mut conn = self.manager.clone();
			let _: String = redis::cmd("PING").query_async(&mut conn).await?;

			Ok(())
		})
	}
}

fn encode_member(entry: &HistoryEntry) -> Result<String> {
	let member = HistoryMember { id: Uuid::new_v4().to_string(), entry: entry.clone() };

	Ok(serde_json::to_string(&member)?)
}
