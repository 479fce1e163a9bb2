use serde::{Deserialize, Serialize};

use dossier_storage::models::{HistoryPage, HistoryQuery};

use crate::{DossierService, Error, Result};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HistoryRequest {
	#[serde(default)]
	pub field: Option<String>,
	#[serde(default)]
	pub cursor: Option<String>,
	#[serde(default)]
	pub limit: Option<u32>,
}

impl DossierService {
	/// Pages through the append-only journal. The cursor is adapter-opaque: pass it back
	/// unchanged.
	pub async fn history(&self, subject: &str, req: HistoryRequest) -> Result<HistoryPage> {
		if subject.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "subject is required.".to_string() });
		}

		let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
		let page = self
			.store()
			.history(subject, HistoryQuery { field: req.field, cursor: req.cursor, limit })
			.await?;

		Ok(page)
	}
}
