mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Catalog, Config, Search, Service, Sort, SourceConfig};

use std::{collections::HashSet, fs, path::Path};

pub const CACHE_SOURCE_ID: &str = "cache";

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.catalog.api_base.trim().is_empty() {
		return Err(Error::Validation {
			message: "catalog.api_base must be non-empty.".to_string(),
		});
	}
	if !cfg.catalog.query_path.starts_with('/') {
		return Err(Error::Validation {
			message: "catalog.query_path must start with '/'.".to_string(),
		});
	}
	if cfg.catalog.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "catalog.timeout_ms must be greater than zero.".to_string(),
		});
	}

	for (key, value) in &cfg.catalog.default_headers {
		if !value.is_string() {
			return Err(Error::Validation {
				message: format!("catalog.default_headers.{key} must be a string."),
			});
		}
	}

	if cfg.search.result_count == 0 {
		return Err(Error::Validation {
			message: "search.result_count must be greater than zero.".to_string(),
		});
	}
	if !matches!(cfg.search.federation.as_str(), "local" | "enterprise" | "selected") {
		return Err(Error::Validation {
			message: "search.federation must be one of local, enterprise, or selected.".to_string(),
		});
	}

	for sort in &cfg.search.sorts {
		if sort.attribute.trim().is_empty() {
			return Err(Error::Validation {
				message: "search.sorts.attribute must be non-empty.".to_string(),
			});
		}
		if !matches!(sort.direction.as_str(), "ascending" | "descending") {
			return Err(Error::Validation {
				message: "search.sorts.direction must be ascending or descending.".to_string(),
			});
		}
	}

	let mut seen = HashSet::new();

	for source in &cfg.sources {
		if source.id.trim().is_empty() {
			return Err(Error::Validation { message: "sources.id must be non-empty.".to_string() });
		}
		if source.id == CACHE_SOURCE_ID {
			return Err(Error::Validation {
				message: format!("sources.id '{CACHE_SOURCE_ID}' is reserved."),
			});
		}
		if !matches!(source.classification.as_str(), "local" | "federated") {
			return Err(Error::Validation {
				message: format!(
					"sources.{}.classification must be local or federated.",
					source.id
				),
			});
		}
		if !seen.insert(source.id.as_str()) {
			return Err(Error::Validation {
				message: format!("sources.id '{}' is declared more than once.", source.id),
			});
		}
	}

	let local = cfg.sources.iter().find(|source| source.id == cfg.search.local_catalog);

	match local {
		Some(source) if source.classification == "local" => {},
		Some(_) => {
			return Err(Error::Validation {
				message: "search.local_catalog must name a source classified as local."
					.to_string(),
			});
		},
		None => {
			return Err(Error::Validation {
				message: "search.local_catalog must name a declared source.".to_string(),
			});
		},
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.catalog.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.catalog.api_key = None;
	}

	cfg.catalog.api_base = cfg.catalog.api_base.trim_end_matches('/').to_string();
	cfg.search.federation = cfg.search.federation.trim().to_ascii_lowercase();

	for source in &mut cfg.sources {
		source.id = source.id.trim().to_string();
		source.classification = source.classification.trim().to_ascii_lowercase();
	}
}
