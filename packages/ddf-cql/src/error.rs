pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
	#[error("CQL syntax error at byte {position}: {message}")]
	Syntax { position: usize, message: String },
	#[error("{path}: {message}")]
	FilterTree { path: String, message: String },
}
impl Error {
	pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
		Self::Syntax { position, message: message.into() }
	}

	pub(crate) fn tree(path: &str, message: impl Into<String>) -> Self {
		Self::FilterTree { path: path.to_string(), message: message.into() }
	}
}
