use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DossierService, Result};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FactsRequest {
	#[serde(default)]
	pub select: Option<Vec<String>>,
	#[serde(default)]
	pub include_nulls: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FiltersRequest {
	#[serde(default)]
	pub select: Option<Vec<String>>,
}

impl DossierService {
	pub async fn get(&self, subject: &str) -> Result<Option<Map<String, Value>>> {
		let record = self.store().get(subject).await?;

		Ok(record.map(|record| record.profile))
	}

	/// Compact JSON rendering of the profile for prompt injection. Keys are sorted
	/// alphabetically; absent subjects yield `None`.
	pub async fn facts_for_prompt(
		&self,
		subject: &str,
		req: FactsRequest,
	) -> Result<Option<String>> {
		let Some(record) = self.store().get(subject).await? else {
			return Ok(None);
		};
		let sorted = record
			.profile
			.into_iter()
			.filter(|(field, value)| {
				selected(req.select.as_deref(), field) && (req.include_nulls || !value.is_null())
			})
			.collect::<BTreeMap<_, _>>();
		let rendered = serde_json::to_string(&sorted).map_err(dossier_storage::Error::from)?;

		Ok(Some(rendered))
	}

	/// Non-null profile fields, typically used as retrieval filters.
	pub async fn filters(
		&self,
		subject: &str,
		req: FiltersRequest,
	) -> Result<Map<String, Value>> {
		let Some(record) = self.store().get(subject).await? else {
			return Ok(Map::new());
		};
		let filtered = record
			.profile
			.into_iter()
			.filter(|(field, value)| selected(req.select.as_deref(), field) && !value.is_null())
			.collect::<Map<_, _>>();

		Ok(filtered)
	}
}

fn selected(select: Option<&[String]>, field: &str) -> bool {
	select.map(|fields| fields.iter().any(|name| name == field)).unwrap_or(true)
}
