use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub catalog: Catalog,
	pub search: Search,
	#[serde(default)]
	pub sources: Vec<SourceConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

/// Catalog query endpoint shared by every source group.
#[derive(Clone, Debug, Deserialize)]
pub struct Catalog {
	pub api_base: String,
	#[serde(default = "default_query_path")]
	pub query_path: String,
	pub timeout_ms: u64,
	/// Optional. Sent as a bearer token when present.
	#[serde(default)]
	pub api_key: Option<String>,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Search {
	/// Page size requested from every source group.
	pub result_count: u32,
	pub cache_enabled: bool,
	/// Id of the local catalog, searched alone under the `local` federation.
	pub local_catalog: String,
	#[serde(default = "default_federation")]
	pub federation: String,
	#[serde(default)]
	pub spellcheck: bool,
	#[serde(default)]
	pub phonetics: bool,
	#[serde(default = "default_sorts")]
	pub sorts: Vec<Sort>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sort {
	pub attribute: String,
	pub direction: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
	pub id: String,
	/// Either "local" (harvested, paged as one group) or "federated".
	#[serde(default = "default_classification")]
	pub classification: String,
	#[serde(default = "default_available")]
	pub available: bool,
}

fn default_query_path() -> String {
	"/search/catalog/internal/cql".to_string()
}

fn default_federation() -> String {
	"enterprise".to_string()
}

fn default_sorts() -> Vec<Sort> {
	vec![Sort { attribute: "modified".to_string(), direction: "descending".to_string() }]
}

fn default_classification() -> String {
	"federated".to_string()
}

fn default_available() -> bool {
	true
}
