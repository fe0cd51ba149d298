use std::fmt::{Display, Formatter};

use serde_json::{Map, Number, Value};

use crate::{Error, Result};

const DEFAULT_DISTANCE_UNITS: &str = "meters";
pub(crate) const MAX_TREE_DEPTH: usize = 64;

/// A scalar on the right-hand side of a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
	Text(String),
	Number(f64),
	Bool(bool),
}
impl Literal {
	pub fn text(value: impl Into<String>) -> Self {
		Self::Text(value.into())
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			Self::Text(value) => Some(value),
			_ => None,
		}
	}

	fn to_value(&self) -> Value {
		match self {
			Self::Text(value) => Value::String(value.clone()),
			Self::Number(value) => Number::from_f64(*value).map(Value::Number).unwrap_or(Value::Null),
			Self::Bool(value) => Value::Bool(*value),
		}
	}

	fn from_value(path: &str, raw: Option<&Value>) -> Result<Self> {
		match raw {
			Some(Value::String(value)) => Ok(Self::Text(value.clone())),
			Some(Value::Bool(value)) => Ok(Self::Bool(*value)),
			Some(Value::Number(value)) => value
				.as_f64()
				.map(Self::Number)
				.ok_or_else(|| Error::tree(path, "number is out of range.")),
			Some(_) => Err(Error::tree(path, "value must be a string, number, or boolean.")),
			None => Err(Error::tree(path, "value is required.")),
		}
	}
}
impl Display for Literal {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
			Self::Number(value) => write!(f, "{value}"),
			Self::Bool(value) => write!(f, "{value}"),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
	Eq,
	NotEq,
	Lt,
	Lte,
	Gt,
	Gte,
	Like,
	ILike,
}
impl CompareOp {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Eq => "=",
			Self::NotEq => "<>",
			Self::Lt => "<",
			Self::Lte => "<=",
			Self::Gt => ">",
			Self::Gte => ">=",
			Self::Like => "LIKE",
			Self::ILike => "ILIKE",
		}
	}

	fn parse(raw: &str) -> Option<Self> {
		match raw {
			"=" => Some(Self::Eq),
			"<>" | "!=" => Some(Self::NotEq),
			"<" => Some(Self::Lt),
			"<=" => Some(Self::Lte),
			">" => Some(Self::Gt),
			">=" => Some(Self::Gte),
			"LIKE" => Some(Self::Like),
			"ILIKE" => Some(Self::ILike),
			_ => None,
		}
	}
}

/// Structured predicate tree. Converts losslessly to and from CQL text for every shape the
/// parser produces.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
	And(Vec<Filter>),
	Or(Vec<Filter>),
	Not(Box<Filter>),
	Compare { property: String, op: CompareOp, value: Literal },
	Between { property: String, lower: Literal, upper: Literal },
	IsNull { property: String },
	Before { property: String, instant: String },
	After { property: String, instant: String },
	During { property: String, from: String, to: String },
	Intersects { property: String, wkt: String },
	DWithin { property: String, wkt: String, distance: f64, units: String },
}
impl Filter {
	pub fn compare(property: impl Into<String>, op: CompareOp, value: Literal) -> Self {
		Self::Compare { property: property.into(), op, value }
	}

	pub fn ilike(property: impl Into<String>, pattern: impl Into<String>) -> Self {
		Self::compare(property, CompareOp::ILike, Literal::text(pattern))
	}

	pub fn eq(property: impl Into<String>, value: Literal) -> Self {
		Self::compare(property, CompareOp::Eq, value)
	}

	/// Conjunction of `self` and `other`, keeping `self` as a single grouped operand.
	pub fn and(self, other: Self) -> Self {
		if self.is_empty() {
			return other;
		}
		if other.is_empty() {
			return self;
		}

		Self::And(vec![self, other])
	}

	/// A filter with no predicates. Serializes to the empty CQL string.
	pub fn is_empty(&self) -> bool {
		match self {
			Self::And(filters) | Self::Or(filters) => filters.iter().all(Self::is_empty),
			Self::Not(inner) => inner.is_empty(),
			_ => false,
		}
	}

	pub fn to_cql(&self) -> String {
		crate::write::to_cql(self)
	}

	/// Renders the tree in the JSON shape used by saved searches.
	pub fn to_value(&self) -> Value {
		let mut obj = Map::new();

		match self {
			Self::And(filters) | Self::Or(filters) => {
				let kind = if matches!(self, Self::And(_)) { "AND" } else { "OR" };

				obj.insert("type".to_string(), Value::String(kind.to_string()));
				obj.insert(
					"filters".to_string(),
					Value::Array(filters.iter().map(Self::to_value).collect()),
				);
			},
			Self::Not(inner) => {
				obj.insert("type".to_string(), Value::String("NOT".to_string()));
				obj.insert("filters".to_string(), Value::Array(vec![inner.to_value()]));
			},
			Self::Compare { property, op, value } => {
				insert_head(&mut obj, op.as_str(), property);
				obj.insert("value".to_string(), value.to_value());
			},
			Self::Between { property, lower, upper } => {
				insert_head(&mut obj, "BETWEEN", property);
				obj.insert("lowerBoundary".to_string(), lower.to_value());
				obj.insert("upperBoundary".to_string(), upper.to_value());
			},
			Self::IsNull { property } => insert_head(&mut obj, "IS NULL", property),
			Self::Before { property, instant } => {
				insert_head(&mut obj, "BEFORE", property);
				obj.insert("value".to_string(), Value::String(instant.clone()));
			},
			Self::After { property, instant } => {
				insert_head(&mut obj, "AFTER", property);
				obj.insert("value".to_string(), Value::String(instant.clone()));
			},
			Self::During { property, from, to } => {
				insert_head(&mut obj, "DURING", property);
				obj.insert("from".to_string(), Value::String(from.clone()));
				obj.insert("to".to_string(), Value::String(to.clone()));
			},
			Self::Intersects { property, wkt } => {
				insert_head(&mut obj, "INTERSECTS", property);
				obj.insert("value".to_string(), Value::String(wkt.clone()));
			},
			Self::DWithin { property, wkt, distance, units } => {
				insert_head(&mut obj, "DWITHIN", property);
				obj.insert("value".to_string(), Value::String(wkt.clone()));
				obj.insert(
					"distance".to_string(),
					Number::from_f64(*distance).map(Value::Number).unwrap_or(Value::Null),
				);
				obj.insert("units".to_string(), Value::String(units.clone()));
			},
		}

		Value::Object(obj)
	}

	/// Parses the JSON filter tree shape produced by [`Filter::to_value`]. Property names may
	/// carry the surrounding double quotes older saved searches stored.
	pub fn from_value(raw: &Value) -> Result<Self> {
		parse_node(raw, "$", 1)
	}
}

fn insert_head(obj: &mut Map<String, Value>, kind: &str, property: &str) {
	obj.insert("type".to_string(), Value::String(kind.to_string()));
	obj.insert("property".to_string(), Value::String(property.to_string()));
}

fn parse_node(raw: &Value, path: &str, depth: usize) -> Result<Filter> {
	if depth > MAX_TREE_DEPTH {
		return Err(Error::tree(path, format!("filter nesting exceeds {MAX_TREE_DEPTH} levels.")));
	}

	let obj = raw.as_object().ok_or_else(|| Error::tree(path, "filter node must be an object."))?;
	let kind = obj
		.get("type")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::tree(&format!("{path}.type"), "filter type is required."))?
		.to_ascii_uppercase();

	match kind.as_str() {
		"AND" | "OR" => {
			let children = parse_children(obj, path, depth)?;

			Ok(if kind == "AND" { Filter::And(children) } else { Filter::Or(children) })
		},
		"NOT" => {
			let mut children = parse_children(obj, path, depth)?;

			if children.len() != 1 {
				return Err(Error::tree(
					&format!("{path}.filters"),
					"NOT requires exactly one child filter.",
				));
			}

			Ok(Filter::Not(Box::new(children.remove(0))))
		},
		"BETWEEN" => Ok(Filter::Between {
			property: property(obj, path)?,
			lower: Literal::from_value(&format!("{path}.lowerBoundary"), obj.get("lowerBoundary"))?,
			upper: Literal::from_value(&format!("{path}.upperBoundary"), obj.get("upperBoundary"))?,
		}),
		"IS NULL" => Ok(Filter::IsNull { property: property(obj, path)? }),
		"BEFORE" => Ok(Filter::Before {
			property: property(obj, path)?,
			instant: string_field(obj, path, "value")?,
		}),
		"AFTER" => Ok(Filter::After {
			property: property(obj, path)?,
			instant: string_field(obj, path, "value")?,
		}),
		"DURING" => Ok(Filter::During {
			property: property(obj, path)?,
			from: string_field(obj, path, "from")?,
			to: string_field(obj, path, "to")?,
		}),
		"INTERSECTS" => Ok(Filter::Intersects {
			property: property(obj, path)?,
			wkt: string_field(obj, path, "value")?,
		}),
		"DWITHIN" => {
			let distance = obj.get("distance").and_then(Value::as_f64).ok_or_else(|| {
				Error::tree(&format!("{path}.distance"), "distance must be a number.")
			})?;
			let units = obj
				.get("units")
				.and_then(Value::as_str)
				.unwrap_or(DEFAULT_DISTANCE_UNITS)
				.to_string();

			Ok(Filter::DWithin {
				property: property(obj, path)?,
				wkt: string_field(obj, path, "value")?,
				distance,
				units,
			})
		},
		other => {
			let op = CompareOp::parse(other).ok_or_else(|| {
				Error::tree(&format!("{path}.type"), format!("unsupported filter type '{other}'."))
			})?;
			let value = Literal::from_value(&format!("{path}.value"), obj.get("value"))?;

			Ok(Filter::Compare { property: property(obj, path)?, op, value })
		},
	}
}

fn parse_children(obj: &Map<String, Value>, path: &str, depth: usize) -> Result<Vec<Filter>> {
	let filters = obj
		.get("filters")
		.and_then(Value::as_array)
		.ok_or_else(|| Error::tree(&format!("{path}.filters"), "filters must be an array."))?;

	filters
		.iter()
		.enumerate()
		.map(|(idx, child)| parse_node(child, &format!("{path}.filters[{idx}]"), depth + 1))
		.collect()
}

fn property(obj: &Map<String, Value>, path: &str) -> Result<String> {
	let raw = string_field(obj, path, "property")?;
	let trimmed = raw.trim();
	let unquoted = trimmed
		.strip_prefix('"')
		.and_then(|rest| rest.strip_suffix('"'))
		.map(|inner| inner.replace("\"\"", "\""))
		.unwrap_or_else(|| trimmed.to_string());

	if unquoted.is_empty() {
		return Err(Error::tree(&format!("{path}.property"), "property must be non-empty."));
	}

	Ok(unquoted)
}

fn string_field(obj: &Map<String, Value>, path: &str, key: &str) -> Result<String> {
	obj.get(key)
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| Error::tree(&format!("{path}.{key}"), format!("{key} must be a string.")))
}
