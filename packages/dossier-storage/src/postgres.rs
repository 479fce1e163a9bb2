use std::collections::BTreeMap;

use serde_json::{Map, Value};
use sqlx::{
	PgPool, Postgres, Row, Transaction,
	postgres::{PgPoolOptions, PgRow},
};

use dossier_domain::merge::{HistoryAction, HistoryEntry, ProvenanceRecord};

use crate::{
	BoxFuture, Error, ProfileStore, Result, schema,
	models::{HistoryPage, HistoryQuery, SetOptions, StoredRecord},
};

const SCHEMA_LOCK_ID: i64 = 3_057_215;

/// Relational adapter. One `profiles` row per subject with an integer `version` column
/// for the compare-and-swap; history rows carry a monotonic id that doubles as the
/// cursor. Profile update and history insert share one transaction.
pub struct PostgresStore {
	pub pool: PgPool,
}
impl PostgresStore {
	pub async fn connect(cfg: &dossier_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		// Advisory lock scoped to the transaction so concurrent processes cannot race the
		// CREATE statements.
		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(SCHEMA_LOCK_ID)
			.execute(&mut *tx)
			.await?;

		for statement in schema::render_schema().split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}
}
impl ProfileStore for PostgresStore {
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>> {
		Box::pin(async move {
			let row =
				sqlx::query("SELECT profile, provenance, version FROM profiles WHERE subject = $1")
					.bind(subject)
					.fetch_optional(&self.pool)
					.await?;
			let Some(row) = row else {
				return Ok(None);
			};
			let profile: Value = row.try_get("profile")?;
			let provenance: Value = row.try_get("provenance")?;
			let version: i64 = row.try_get("version")?;
			let Value::Object(profile) = profile else {
				return Err(Error::InvalidArgument(format!(
					"Profile for {subject} is not a JSON object."
				)));
			};
			let provenance: BTreeMap<String, ProvenanceRecord> =
				serde_json::from_value(provenance)?;

			Ok(Some(StoredRecord { profile, provenance, etag: version.to_string() }))
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
			let profile_json = Value::Object(profile.clone());
			let provenance_json = serde_json::to_value(provenance)?;
			let mut tx = self.pool.begin().await?;
			let version = match options.expected_etag.as_deref() {
				Some(expected) => {
					let expected: i64 = expected.parse().map_err(|_| {
						Error::InvalidArgument(format!("Etag {expected:?} is not a version."))
					})?;
					let row = sqlx::query(
						"\
UPDATE profiles
SET profile = $3, provenance = $4, version = version + 1, updated_at = now()
WHERE subject = $1 AND version = $2
RETURNING version",
					)
					.bind(subject)
					.bind(expected)
					.bind(&profile_json)
					.bind(&provenance_json)
					.fetch_optional(&mut *tx)
					.await?;
					let Some(row) = row else {
						return Err(Error::Conflict(format!(
							"Version mismatch for {subject}: expected {expected}."
						)));
					};

					row.try_get::<i64, _>("version")?
				},
				None if options.force => {
					let row = sqlx::query(
						"\
INSERT INTO profiles (subject, profile, provenance, version)
VALUES ($1, $2, $3, 1)
ON CONFLICT (subject) DO UPDATE
SET profile = EXCLUDED.profile,
	provenance = EXCLUDED.provenance,
	version = profiles.version + 1,
	updated_at = now()
RETURNING version",
					)
					.bind(subject)
					.bind(&profile_json)
					.bind(&provenance_json)
					.fetch_one(&mut *tx)
					.await?;

					row.try_get::<i64, _>("version")?
				},
				None => {
					let row = sqlx::query(
						"\
INSERT INTO profiles (subject, profile, provenance, version)
VALUES ($1, $2, $3, 1)
ON CONFLICT (subject) DO NOTHING
RETURNING version",
					)
					.bind(subject)
					.bind(&profile_json)
					.bind(&provenance_json)
					.fetch_optional(&mut *tx)
					.await?;
					let Some(row) = row else {
						return Err(Error::Conflict(format!(
							"Record for {subject} already exists."
						)));
					};

					row.try_get::<i64, _>("version")?
				},
			};

			insert_history_tx(&mut tx, subject, history).await?;

			tx.commit().await?;

			Ok(version.to_string())
		})
	}

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut tx = self.pool.begin().await?;

			insert_history_tx(&mut tx, subject, entries).await?;

			tx.commit().await?;

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
				Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
					Error::InvalidArgument(format!("Cursor {raw:?} is not a history id."))
				})?),
				None => None,
			};
			let mut builder = sqlx::QueryBuilder::new(
				"SELECT id, field, value, previous_value, source, timestamp_ms, confidence, inferred, action, reason \
				 FROM profile_history WHERE subject = ",
			);

			builder.push_bind(subject);

			if let Some(field) = query.field.as_deref() {
				builder.push(" AND field = ");
				builder.push_bind(field);
			}
			if let Some(after) = after {
				builder.push(" AND id > ");
				builder.push_bind(after);
			}

			builder.push(" ORDER BY id ASC LIMIT ");
			builder.push_bind(query.limit as i64 + 1);

			let rows = builder.build().fetch_all(&self.pool).await?;
			let limit = query.limit as usize;
			let has_more = rows.len() > limit;
			let mut entries = Vec::with_capacity(rows.len().min(limit));
			let mut last_id = None;

			for row in rows.into_iter().take(limit) {
				last_id = Some(row.try_get::<i64, _>("id")?);

				entries.push(entry_from_row(&row)?);
			}

			let next_cursor =
				if has_more { last_id.map(|id| id.to_string()) } else { None };

			Ok(HistoryPage { entries, next_cursor })
		})
	}

	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut tx = self.pool.begin().await?;

			sqlx::query("DELETE FROM profile_history WHERE subject = $1")
				.bind(subject)
				.execute(&mut *tx)
				.await?;

			let deleted = sqlx::query("DELETE FROM profiles WHERE subject = $1")
				.bind(subject)
				.execute(&mut *tx)
				.await?;

			tx.commit().await?;

			Ok(deleted.rows_affected() > 0)
		})
	}

	fn health_check(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			sqlx::query("SELECT 1").execute(&self.pool).await?;

			Ok(())
		})
	}
}

async fn insert_history_tx(
	tx: &mut Transaction<'_, Postgres>,
	subject: &str,
	entries: &[HistoryEntry],
) -> Result<()> {
	if entries.is_empty() {
		return Ok(());
	}

	let mut builder = sqlx::QueryBuilder::new(
		"INSERT INTO profile_history \
		 (subject, field, value, previous_value, source, timestamp_ms, confidence, inferred, action, reason) ",
	);

	builder.push_values(entries, |mut b, entry| {
		b.push_bind(subject)
			.push_bind(entry.field.as_str())
			.push_bind(&entry.value)
			.push_bind(entry.previous_value.as_ref())
			.push_bind(entry.source.as_str())
			.push_bind(entry.timestamp_ms)
			.push_bind(entry.confidence)
			.push_bind(entry.inferred)
			.push_bind(action_to_str(entry.action))
			.push_bind(entry.reason.as_deref());
	});
	builder.build().execute(&mut **tx).await?;

	Ok(())
}

fn entry_from_row(row: &PgRow) -> Result<HistoryEntry> {
	let action: String = row.try_get("action")?;

	Ok(HistoryEntry {
		field: row.try_get("field")?,
		value: row.try_get("value")?,
		previous_value: row.try_get("previous_value")?,
		source: row.try_get("source")?,
		timestamp_ms: row.try_get("timestamp_ms")?,
		confidence: row.try_get("confidence")?,
		inferred: row.try_get("inferred")?,
		action: action_from_str(&action)?,
		reason: row.try_get("reason")?,
	})
}

fn action_to_str(action: HistoryAction) -> &'static str {
	match action {
		HistoryAction::Set => "set",
		HistoryAction::Delete => "delete",
		HistoryAction::Rejected => "rejected",
	}
}

fn action_from_str(raw: &str) -> Result<HistoryAction> {
	match raw {
		"set" => Ok(HistoryAction::Set),
		"delete" => Ok(HistoryAction::Delete),
		"rejected" => Ok(HistoryAction::Rejected),
		other => Err(Error::InvalidArgument(format!("Unknown history action {other:?}."))),
	}
}
