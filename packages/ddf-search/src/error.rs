pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Invalid filter: {0}")]
	Filter(#[from] ddf_cql::Error),
	#[error("Provider error: {0}")]
	Provider(#[from] ddf_providers::Error),
	#[error("Configuration error: {message}")]
	Config { message: String },
}

/// Why one source group produced no page. Never escalates past that group's statuses.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceFailure {
	#[error("Source {source_id} is not authenticated.")]
	Unauthorized { source_id: String, url: Option<String> },
	#[error("Request timed out.")]
	Timeout,
	#[error("{message}")]
	Failed { message: String },
}
