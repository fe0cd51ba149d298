use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CACHE_SOURCE_ID, Metacard, RawResult};

pub const RELEVANCE: &str = "RELEVANCE";
pub const DISTANCE: &str = "DISTANCE";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
	Ascending,
	Descending,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
	pub attribute: String,
	pub direction: SortDirection,
}
impl SortSpec {
	pub fn new(attribute: impl Into<String>, direction: SortDirection) -> Self {
		Self { attribute: attribute.into(), direction }
	}

	pub fn parse(attribute: &str, direction: &str) -> Option<Self> {
		let direction = match direction.to_ascii_lowercase().as_str() {
			"ascending" => SortDirection::Ascending,
			"descending" => SortDirection::Descending,
			_ => return None,
		};

		Some(Self::new(attribute, direction))
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRecord {
	pub metacard: Metacard,
	pub source_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub relevance: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub distance: Option<f64>,
	#[serde(skip)]
	pub arrival: u64,
}
impl ResultRecord {
	pub fn id(&self) -> &str {
		self.metacard.id().unwrap_or_default()
	}

	fn sort_value(&self, attribute: &str) -> Option<SortValue<'_>> {
		match attribute {
			RELEVANCE => self.relevance.map(SortValue::Number),
			DISTANCE => self.distance.map(SortValue::Number),
			_ => match self.metacard.property(attribute)? {
				Value::Number(number) => number.as_f64().map(SortValue::Number),
				Value::String(text) => Some(SortValue::Text(text)),
				Value::Bool(flag) => Some(SortValue::Number(if *flag { 1.0 } else { 0.0 })),
				_ => None,
			},
		}
	}
}

enum SortValue<'a> {
	Number(f64),
	Text(&'a str),
}
impl SortValue<'_> {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Self::Number(a), Self::Number(b)) => a.total_cmp(b),
			(Self::Text(a), Self::Text(b)) => a.cmp(b),
			(Self::Number(_), Self::Text(_)) => Ordering::Less,
			(Self::Text(_), Self::Number(_)) => Ordering::Greater,
		}
	}
}

/// Merged, deduplicated and sorted view over every batch of the current round.
///
/// Batches land in a queue first. With auto-merge on (the default) every batch is merged as it
/// arrives; otherwise the owner calls [`ResultSet::merge`] when it wants the view updated.
#[derive(Clone, Debug)]
pub struct ResultSet {
	records: Vec<ResultRecord>,
	queued: Vec<ResultRecord>,
	sorts: Vec<SortSpec>,
	auto_merge: bool,
	next_arrival: u64,
}
impl ResultSet {
	pub fn new(sorts: Vec<SortSpec>) -> Self {
		Self { records: Vec::new(), queued: Vec::new(), sorts, auto_merge: true, next_arrival: 0 }
	}

	pub fn sorts(&self) -> &[SortSpec] {
		&self.sorts
	}

	pub fn set_sorts(&mut self, sorts: Vec<SortSpec>) {
		self.sorts = sorts;

		self.sort();
	}

	pub fn auto_merge(&self) -> bool {
		self.auto_merge
	}

	pub fn set_auto_merge(&mut self, auto_merge: bool) {
		self.auto_merge = auto_merge;
	}

	/// Starts a round from `seed`, dropping anything still queued.
	pub fn reset(&mut self, sorts: Vec<SortSpec>, seed: Vec<ResultRecord>) {
		self.records = seed;
		self.queued.clear();
		self.sorts = sorts;

		self.sort();
	}

	/// Queues one response batch. Records without an id cannot be deduplicated and are skipped.
	/// Cache records keep the `source-id` of the site they were collected from, so a batch
	/// answered by the cache is filed under the cache regardless of that property.
	pub fn add_batch(&mut self, default_source: &str, batch: Vec<RawResult>) -> usize {
		let mut added = 0;

		for raw in batch {
			if raw.metacard.id().is_none() {
				tracing::debug!(source_id = default_source, "Skipping result without an id.");

				continue;
			}

			let source_id = if default_source == CACHE_SOURCE_ID {
				CACHE_SOURCE_ID
			} else {
				raw.metacard.source_id().unwrap_or(default_source)
			}
			.to_string();

			self.queued.push(ResultRecord {
				metacard: raw.metacard,
				source_id,
				relevance: raw.relevance,
				distance: raw.distance,
				arrival: self.next_arrival,
			});
			self.next_arrival += 1;

			added += 1;
		}

		added
	}

	/// Moves queued records into the view. A record from a real source replaces a cached copy
	/// of the same id; any other duplicate is dropped.
	pub fn merge(&mut self) {
		for record in std::mem::take(&mut self.queued) {
			match self.records.iter_mut().find(|existing| existing.id() == record.id()) {
				Some(existing)
					if existing.source_id == CACHE_SOURCE_ID
						&& record.source_id != CACHE_SOURCE_ID =>
				{
					let arrival = existing.arrival;

					*existing = ResultRecord { arrival, ..record };
				},
				Some(_) => {},
				None => self.records.push(record),
			}
		}

		self.sort();
	}

	pub fn empty_queue(&mut self) {
		self.queued.clear();
	}

	pub fn is_unmerged(&self) -> bool {
		!self.queued.is_empty()
	}

	pub fn queued_len(&self) -> usize {
		self.queued.len()
	}

	pub fn records(&self) -> &[ResultRecord] {
		&self.records
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.records.iter().any(|record| record.id() == id)
	}

	/// Stable sort by the active keys, then by arrival.
	pub fn sort(&mut self) {
		let sorts = &self.sorts;

		self.records.sort_by(|a, b| compare(sorts, a, b));
	}
}

fn compare(sorts: &[SortSpec], a: &ResultRecord, b: &ResultRecord) -> Ordering {
	for sort in sorts {
		let ordering = match (a.sort_value(&sort.attribute), b.sort_value(&sort.attribute)) {
			(Some(left), Some(right)) => match sort.direction {
				SortDirection::Ascending => left.cmp(&right),
				SortDirection::Descending => right.cmp(&left),
			},
			// Missing values sort last in either direction.
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => Ordering::Equal,
		};

		if ordering != Ordering::Equal {
			return ordering;
		}
	}

	a.arrival.cmp(&b.arrival)
}
