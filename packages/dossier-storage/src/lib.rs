pub mod memory;
pub mod models;
pub mod postgres;
pub mod redis_kv;
pub mod schema;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

use std::{collections::BTreeMap, future::Future, pin::Pin};

use serde_json::{Map, Value};

use dossier_domain::merge::{HistoryEntry, ProvenanceRecord};
use models::{HistoryPage, HistoryQuery, SetOptions, StoredRecord};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Uniform contract over the three backends. Etags increase strictly per subject; a
/// failed precondition surfaces as `Error::Conflict`; the history rows passed to `set`
/// land atomically with the profile write.
pub trait ProfileStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>>>;

	/// Writes the record under the given precondition and returns the new etag.
	fn set<'a>(
		&'a self,
		subject: &'a str,
		profile: &'a Map<String, Value>,
		provenance: &'a BTreeMap<String, ProvenanceRecord>,
		options: SetOptions,
		history: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<String>>;

	/// Journals entries without touching the profile. Used when a batch produced only
	/// rejections and there is nothing to write.
	fn append_history<'a>(
		&'a self,
		subject: &'a str,
		entries: &'a [HistoryEntry],
	) -> BoxFuture<'a, Result<()>>;

	fn history<'a>(
		&'a self,
		subject: &'a str,
		query: HistoryQuery,
	) -> BoxFuture<'a, Result<HistoryPage>>;

	/// Removes the profile and its full history together. Returns whether a profile
	/// existed.
	fn delete<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<bool>>;

	fn health_check(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async { Ok(()) })
	}
}
