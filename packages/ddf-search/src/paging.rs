use std::collections::BTreeMap;

use crate::{CACHE_SOURCE_ID, SourceRegistry, StatusBoard};

/// Offset key shared by every locally classified source.
pub const LOCAL_GROUP: &str = "local";

/// Next 1-based read offset per source group. Unseen keys read as 1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OffsetTable(BTreeMap<String, u64>);
impl OffsetTable {
	pub fn get(&self, key: &str) -> u64 {
		self.0.get(key).copied().unwrap_or(1)
	}

	pub fn set(&mut self, key: impl Into<String>, offset: u64) {
		self.0.insert(key.into(), offset.max(1));
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
		self.0.iter().map(|(key, offset)| (key.as_str(), *offset))
	}
}

/// Tracks where each source group resumes reading.
///
/// `current` holds the offsets the running round was dispatched with. `next` holds the offsets
/// the following round will use, and `history` the `next` tables that were replaced by forward
/// paging so they can be restored exactly.
#[derive(Clone, Debug, Default)]
pub struct PageTracker {
	current: OffsetTable,
	next: OffsetTable,
	history: Vec<OffsetTable>,
}
impl PageTracker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn start_offset_for(&self, key: &str) -> u64 {
		self.current.get(key)
	}

	pub fn current(&self) -> &OffsetTable {
		&self.current
	}

	pub fn staged(&self) -> &OffsetTable {
		&self.next
	}

	/// Makes the staged offsets current for a new round.
	pub fn begin_round(&mut self) {
		self.current = self.next.clone();
	}

	/// Stages the page after the current one. Each group moves forward by what it returned last,
	/// never past its hit total plus one.
	pub fn advance_to_next_page(
		&mut self,
		selected: &[String],
		registry: &SourceRegistry,
		statuses: &StatusBoard,
	) {
		let mut table = OffsetTable::default();

		table.set(LOCAL_GROUP, 1);

		for id in selected.iter().filter(|id| registry.is_federated(id)) {
			table.set(id.clone(), 1);
		}
		for (key, offset) in self.current.iter() {
			table.set(key, offset);
		}

		let local_cap = statuses
			.iter()
			.filter(|status| registry.is_local(&status.id))
			.filter_map(|status| status.hits)
			.sum::<u64>()
			+ 1;

		for status in statuses.iter().filter(|status| status.id != CACHE_SOURCE_ID) {
			if registry.is_local(&status.id) {
				let offset = (table.get(LOCAL_GROUP) + status.count).min(local_cap);

				table.set(LOCAL_GROUP, offset);
			} else {
				let cap = status.hits.map(|hits| hits + 1).unwrap_or(1);
				let offset = (table.get(&status.id) + status.count).min(cap);

				table.set(status.id.clone(), offset);
			}
		}

		self.history.push(std::mem::replace(&mut self.next, table));
	}

	/// Restores the previously staged page. Returns `false` and leaves the tracker untouched when
	/// there is no earlier page.
	pub fn retreat_to_previous_page(&mut self) -> bool {
		match self.history.pop() {
			Some(previous) => {
				self.next = previous;

				true
			},
			None => {
				tracing::debug!("No previous page to return to.");

				false
			},
		}
	}

	pub fn reset(&mut self) {
		self.current = OffsetTable::default();
		self.next = OffsetTable::default();
		self.history.clear();
	}

	pub fn has_previous_page(&self) -> bool {
		!self.history.is_empty()
	}

	/// Whether any source group still has unread hits past the current round.
	pub fn has_next_page(&self, registry: &SourceRegistry, statuses: &StatusBoard) -> bool {
		let (local_seen, local_hits) = statuses
			.iter()
			.filter(|status| registry.is_local(&status.id))
			.fold((0, 0), |(seen, hits), status| {
				(seen + status.count, hits + status.hits.unwrap_or(0))
			});

		if local_seen + self.current.get(LOCAL_GROUP) <= local_hits {
			return true;
		}

		statuses.iter().filter(|status| registry.is_federated(&status.id)).any(|status| {
			status
				.hits
				.map(|hits| status.count + self.current.get(&status.id) <= hits)
				.unwrap_or(false)
		})
	}

	/// Zero-based index of the page the next round reads.
	pub fn page_index(&self) -> usize {
		self.history.len()
	}
}
