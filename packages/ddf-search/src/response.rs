use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One catalog answer. `status` is an object for single-source requests and an array for
/// batched local requests; both decode to a list.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct QueryResponse {
	#[serde(default)]
	pub results: Vec<RawResult>,
	#[serde(default, deserialize_with = "one_or_many")]
	pub status: Vec<StatusReport>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RawResult {
	pub metacard: Metacard,
	#[serde(default)]
	pub relevance: Option<f64>,
	#[serde(default)]
	pub distance: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Metacard {
	#[serde(default)]
	pub properties: Map<String, Value>,
}
impl Metacard {
	pub fn id(&self) -> Option<&str> {
		self.properties.get("id").and_then(Value::as_str)
	}

	pub fn source_id(&self) -> Option<&str> {
		self.properties.get("source-id").and_then(Value::as_str)
	}

	pub fn property(&self, name: &str) -> Option<&Value> {
		self.properties.get(name)
	}
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StatusReport {
	pub id: String,
	#[serde(default)]
	pub hits: Option<u64>,
	#[serde(default)]
	pub count: Option<u64>,
	#[serde(default)]
	pub elapsed: Option<u64>,
	#[serde(default)]
	pub successful: Option<bool>,
	#[serde(default)]
	pub warnings: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<StatusReport>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum OneOrMany {
		One(StatusReport),
		Many(Vec<StatusReport>),
		Null(()),
	}

	Ok(match OneOrMany::deserialize(deserializer)? {
		OneOrMany::One(report) => vec![report],
		OneOrMany::Many(reports) => reports,
		OneOrMany::Null(()) => Vec::new(),
	})
}
