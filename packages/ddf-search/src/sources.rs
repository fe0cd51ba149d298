use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use ddf_config::CACHE_SOURCE_ID;

/// How a source participates in paging. Local sources share one offset; federated sources
/// page on their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
	Local,
	Federated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
	pub id: String,
	pub class: SourceClass,
	pub available: bool,
}
impl Source {
	pub fn local(id: impl Into<String>) -> Self {
		Self { id: id.into(), class: SourceClass::Local, available: true }
	}

	pub fn federated(id: impl Into<String>) -> Self {
		Self { id: id.into(), class: SourceClass::Federated, available: true }
	}
}

#[derive(Clone, Debug)]
pub struct SourceRegistry {
	sources: Vec<Source>,
	local_catalog: String,
	cache_enabled: bool,
}
impl SourceRegistry {
	/// The local catalog is registered as a local source if it is not added explicitly.
	pub fn new(local_catalog: impl Into<String>, cache_enabled: bool) -> Self {
		let local_catalog = local_catalog.into();

		Self { sources: vec![Source::local(local_catalog.clone())], local_catalog, cache_enabled }
	}

	pub fn from_config(cfg: &ddf_config::Config) -> Result<Self> {
		let mut registry = Self::new(cfg.search.local_catalog.clone(), cfg.search.cache_enabled);

		for source in &cfg.sources {
			let class = match source.classification.as_str() {
				"local" => SourceClass::Local,
				"federated" => SourceClass::Federated,
				other => {
					return Err(Error::Config {
						message: format!("unknown classification '{other}' for {}.", source.id),
					});
				},
			};

			registry.register(Source { id: source.id.clone(), class, available: source.available });
		}

		Ok(registry)
	}

	pub fn with_source(mut self, source: Source) -> Self {
		self.register(source);

		self
	}

	/// Adds a source or replaces the entry with the same id.
	pub fn register(&mut self, source: Source) {
		if source.id == CACHE_SOURCE_ID {
			tracing::warn!("Ignoring attempt to register the cache pseudo-source.");

			return;
		}

		match self.sources.iter_mut().find(|existing| existing.id == source.id) {
			Some(existing) => *existing = source,
			None => self.sources.push(source),
		}
	}

	pub fn set_available(&mut self, id: &str, available: bool) {
		if let Some(source) = self.sources.iter_mut().find(|source| source.id == id) {
			source.available = available;
		}
	}

	pub fn local_catalog(&self) -> &str {
		&self.local_catalog
	}

	pub fn cache_enabled(&self) -> bool {
		self.cache_enabled
	}

	pub fn sources(&self) -> &[Source] {
		&self.sources
	}

	pub fn ids(&self) -> Vec<String> {
		self.sources.iter().map(|source| source.id.clone()).collect()
	}

	pub fn available_ids(&self) -> Vec<String> {
		self.sources.iter().filter(|source| source.available).map(|source| source.id.clone()).collect()
	}

	/// Unregistered ids are treated as federated.
	pub fn class_of(&self, id: &str) -> SourceClass {
		self.sources
			.iter()
			.find(|source| source.id == id)
			.map(|source| source.class)
			.unwrap_or(SourceClass::Federated)
	}

	pub fn is_local(&self, id: &str) -> bool {
		id != CACHE_SOURCE_ID && self.class_of(id) == SourceClass::Local
	}

	pub fn is_federated(&self, id: &str) -> bool {
		id != CACHE_SOURCE_ID && self.class_of(id) == SourceClass::Federated
	}
}
