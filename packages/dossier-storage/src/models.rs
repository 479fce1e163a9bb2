use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use dossier_domain::merge::ProvenanceRecord;

/// The stored triple for one subject. The etag is adapter-private in form (an integer
/// version, a row version, a revision counter) but always an opaque string externally.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoredRecord {
	pub profile: Map<String, Value>,
	pub provenance: BTreeMap<String, ProvenanceRecord>,
	pub etag: String,
}

/// Write precondition. `expected_etag` arms the compare-and-swap; `force` overwrites
/// unconditionally. With neither, the write only succeeds when the subject is absent.
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
	pub expected_etag: Option<String>,
	pub force: bool,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
	pub field: Option<String>,
	pub cursor: Option<String>,
	pub limit: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HistoryPage {
	pub entries: Vec<dossier_domain::merge::HistoryEntry>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub next_cursor: Option<String>,
}
