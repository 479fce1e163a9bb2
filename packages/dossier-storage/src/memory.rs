use std::{
	collections::{BTreeMap, HashMap, VecDeque},
	sync::Mutex,
};

use serde_json::{Map, Value};

use dossier_domain::merge::{HistoryEntry, ProvenanceRecord};

use crate::{
	BoxFuture, Error, ProfileStore, Result,
	models::{HistoryPage, HistoryQuery, SetOptions, StoredRecord},
};

struct MemoryRecord {
	profile: Map<String, Value>,
	provenance: BTreeMap<String, ProvenanceRecord>,
	version: u64,
}

#[derive(Default)]
struct MemoryState {
	records: HashMap<String, MemoryRecord>,
	histories: HashMap<String, VecDeque<HistoryEntry>>,
}

/// Process-local adapter. The integer version doubles as the etag; the history tail is
/// bounded at `max_history` entries per subject, oldest first; the cursor is the entry
/// timestamp.
pub struct MemoryStore {
	max_history: usize,
	state: Mutex<MemoryState>,
}
impl MemoryStore {
	pub fn new(cfg: &dossier_config::MemoryStorage) -> Self {
		Self { max_history: cfg.max_history, state: Mutex::new(MemoryState::default()) }
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl ProfileStore for MemoryStore {
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>> {
		Box::pin(async move {
			let state = self.lock();
			let record = state.records.get(subject).map(|record| StoredRecord {
				profile: record.profile.clone(),
				provenance: record.provenance.clone(),
				etag: record.version.to_string(),
			});

			Ok(record)
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
			let mut state = self.lock();
			let current_version = state.records.get(subject).map(|record| record.version);
			let next_version = match (&options.expected_etag, current_version) {
				(Some(expected), Some(version)) =>
					if expected == &version.to_string() {
						version + 1
					} else {
						return Err(Error::Conflict(format!(
							"Version mismatch for {subject}: expected {expected}, found {version}."
						)));
					},
				(Some(expected), None) =>
					return Err(Error::Conflict(format!(
						"Version mismatch for {subject}: expected {expected}, record is absent."
					))),
				(None, Some(version)) =>
					if options.force {
						version + 1
					} else {
						return Err(Error::Conflict(format!(
							"Record for {subject} already exists at version {version}."
						)));
					},
				(None, None) => 1,
			};

			state.records.insert(subject.to_string(), MemoryRecord {
				profile: profile.clone(),
				provenance: provenance.clone(),
				version: next_version,
			});

			let tail = state.histories.entry(subject.to_string()).or_default();

			tail.extend(history.iter().cloned());

			while tail.len() > self.max_history {
				tail.pop_front();
			}

			Ok(next_version.to_string())
		})
	}

	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut state = self.lock();
			let tail = state.histories.entry(subject.to_string()).or_default();

			tail.extend(entries.iter().cloned());

			while tail.len() > self.max_history {
				tail.pop_front();
			}

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
					Error::InvalidArgument(format!("Cursor {raw:?} is not a timestamp."))
				})?),
				None => None,
			};
			let state = self.lock();
			let Some(tail) = state.histories.get(subject) else {
				return Ok(HistoryPage::default());
			};
			let matching = tail
				.iter()
				.filter(|entry| {
					query.field.as_deref().map(|field| entry.field == field).unwrap_or(true)
				})
				.filter(|entry| after.map(|after| entry.timestamp_ms > after).unwrap_or(true))
				.cloned()
				.collect::<Vec<_>>();
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
			let mut state = self.lock();
			let existed = state.records.remove(subject).is_some();

			state.histories.remove(subject);

			Ok(existed)
		})
	}
}
