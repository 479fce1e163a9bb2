pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("No profile schema is registered.")]
	SchemaNotRegistered,
	#[error("Invalid schema: {message}")]
	SchemaInvalid { message: String },
	#[error("No extractor provider is configured.")]
	ExtractorNotConfigured,
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Extractor failed: {message}")]
	Extractor { message: String, retryable: bool },
	#[error("Persistence failed after {attempts} attempts: {message}")]
	Persistence { attempts: u32, message: String },
	#[error(transparent)]
	Storage(#[from] dossier_storage::Error),
}
