use crate::{DossierService, Error, Result};

impl DossierService {
	/// Removes the profile and its journal together. Returns whether a profile existed.
	pub async fn delete(&self, subject: &str) -> Result<bool> {
		if subject.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "subject is required.".to_string() });
		}

		let existed = self.store().delete(subject).await?;

		Ok(existed)
	}
}
