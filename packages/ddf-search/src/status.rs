use serde::Serialize;

use crate::{CACHE_SOURCE_ID, StatusReport};

/// Per-source progress of the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
	pub id: String,
	pub pending: bool,
	/// `None` until the source answers.
	pub successful: Option<bool>,
	/// Authoritative only after the first response.
	pub hits: Option<u64>,
	pub count: u64,
	pub elapsed: Option<u64>,
	pub warnings: Vec<String>,
}
impl SourceStatus {
	pub fn pending(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			pending: true,
			successful: None,
			hits: None,
			count: 0,
			elapsed: None,
			warnings: Vec::new(),
		}
	}
}

#[derive(Clone, Debug, Default)]
pub struct StatusBoard {
	statuses: Vec<SourceStatus>,
}
impl StatusBoard {
	/// Starts a round. Seeded statuses survive unless the round queries the same source again.
	pub fn reset(&mut self, ids: &[String], seed: Vec<SourceStatus>) {
		self.statuses = seed.into_iter().filter(|status| !ids.contains(&status.id)).collect();

		for id in ids {
			self.statuses.push(SourceStatus::pending(id.clone()));
		}
	}

	pub fn clear(&mut self) {
		self.statuses.clear();
	}

	pub fn get(&self, id: &str) -> Option<&SourceStatus> {
		self.statuses.iter().find(|status| status.id == id)
	}

	pub fn iter(&self) -> impl Iterator<Item = &SourceStatus> {
		self.statuses.iter()
	}

	pub fn len(&self) -> usize {
		self.statuses.len()
	}

	pub fn is_empty(&self) -> bool {
		self.statuses.is_empty()
	}

	pub fn snapshot(&self) -> Vec<SourceStatus> {
		self.statuses.clone()
	}

	/// Applies one status entry from a response. Reports without `successful` count as success.
	pub fn apply_report(&mut self, report: &StatusReport) -> SourceStatus {
		let status = self.entry(&report.id);

		status.pending = false;
		status.successful = Some(report.successful.unwrap_or(true));
		status.hits = report.hits.or(status.hits);
		status.count = report.count.unwrap_or(0);
		status.elapsed = report.elapsed;
		status.warnings = report.warnings.clone();

		status.clone()
	}

	/// Closes out sources of a request whose response carried no status entry for them.
	pub fn complete_request(&mut self, sources: &[String]) -> Vec<SourceStatus> {
		let mut changed = Vec::new();

		for id in sources {
			let status = self.entry(id);

			if status.pending {
				status.pending = false;
				status.successful = Some(true);

				changed.push(status.clone());
			}
		}

		changed
	}

	pub fn mark_failed(&mut self, sources: &[String]) -> Vec<SourceStatus> {
		sources
			.iter()
			.map(|id| {
				let status = self.entry(id);

				status.pending = false;
				status.successful = Some(false);
				status.count = 0;

				status.clone()
			})
			.collect()
	}

	/// Stops waiting on every source without judging the outcome.
	pub fn finish_pending(&mut self) {
		for status in &mut self.statuses {
			status.pending = false;
		}
	}

	pub fn is_pending(&self) -> bool {
		self.statuses.iter().any(|status| status.pending)
	}

	/// Hits across real sources. The cache mirrors them and is left out.
	pub fn total_hits(&self) -> u64 {
		self.statuses
			.iter()
			.filter(|status| status.id != CACHE_SOURCE_ID)
			.filter_map(|status| status.hits)
			.sum()
	}

	fn entry(&mut self, id: &str) -> &mut SourceStatus {
		let idx = match self.statuses.iter().position(|status| status.id == id) {
			Some(idx) => idx,
			None => {
				self.statuses.push(SourceStatus::pending(id));

				self.statuses.len() - 1
			},
		};

		&mut self.statuses[idx]
	}
}
