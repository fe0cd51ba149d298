use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ddf_cql::{Filter, Literal};

use crate::{
	CACHE_SOURCE_ID, CatalogTransport, LOCAL_GROUP, PageTracker, QueryResponse, SortSpec,
	SourceFailure, SourceRegistry,
};

/// Property the cache uses to record where a cached metacard came from.
const CACHE_SOURCE_PROPERTY: &str = "metacard_source";

/// Which offset a request reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestGroup {
	Local,
	Federated(String),
	Cache,
}
impl RequestGroup {
	pub fn offset_key(&self) -> &str {
		match self {
			Self::Local => LOCAL_GROUP,
			Self::Federated(id) => id,
			Self::Cache => CACHE_SOURCE_ID,
		}
	}
}

/// Body POSTed to the catalog for one source group.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
	pub sources: Vec<String>,
	pub cql: String,
	pub start: u64,
	pub count: u32,
	pub sorts: Vec<SortSpec>,
	/// Milliseconds.
	pub timeout: u64,
	pub id: String,
	pub batch_id: Uuid,
	pub spellcheck: bool,
	pub phonetics: bool,
	#[serde(skip)]
	pub group: RequestGroup,
}

/// A finished request, tagged with the round it belongs to.
#[derive(Debug)]
pub struct SourceEvent {
	pub batch_id: Uuid,
	pub request: SearchRequest,
	pub outcome: Result<QueryResponse, SourceFailure>,
}

/// Splits `selected` into request groups: every local source in one batched request, each
/// federated source on its own, and the cache narrowed to the same sources when it is enabled.
/// Groups without members produce no request.
pub fn build_requests(
	base: &SearchRequest,
	selected: &[String],
	registry: &SourceRegistry,
	tracker: &PageTracker,
) -> Vec<SearchRequest> {
	let local: Vec<String> = selected.iter().filter(|id| registry.is_local(id)).cloned().collect();
	let federated = selected.iter().filter(|id| registry.is_federated(id));
	let mut requests = Vec::new();

	if !local.is_empty() {
		requests.push(SearchRequest {
			sources: local,
			start: tracker.start_offset_for(LOCAL_GROUP),
			group: RequestGroup::Local,
			..base.clone()
		});
	}

	for id in federated {
		requests.push(SearchRequest {
			sources: vec![id.clone()],
			start: tracker.start_offset_for(id),
			group: RequestGroup::Federated(id.clone()),
			..base.clone()
		});
	}

	let real: Vec<String> = selected.iter().filter(|id| *id != CACHE_SOURCE_ID).cloned().collect();

	if registry.cache_enabled() && !real.is_empty() {
		requests.push(SearchRequest {
			sources: vec![CACHE_SOURCE_ID.to_string()],
			cql: narrow_cache_cql(&base.cql, &real),
			start: tracker.start_offset_for(CACHE_SOURCE_ID),
			group: RequestGroup::Cache,
			..base.clone()
		});
	}

	requests
}

/// Restricts `cql` to metacards the cache collected from `sources`.
pub fn narrow_cache_cql(cql: &str, sources: &[String]) -> String {
	let restriction = Filter::Or(
		sources.iter().map(|id| Filter::eq(CACHE_SOURCE_PROPERTY, Literal::text(id.as_str()))).collect(),
	);

	match ddf_cql::parse(cql) {
		Ok(filter) => filter.and(restriction).to_cql(),
		Err(err) => {
			tracing::warn!(error = %err, "Failed to parse query text for the cache request.");

			format!("({cql}) AND ({})", restriction.to_cql())
		},
	}
}

/// Runs every request on its own task. Each task reports exactly once on `events`, unless the
/// round is cancelled first. A transport that panics is reported as a failed request.
pub fn spawn_requests(
	requests: Vec<SearchRequest>,
	transport: Arc<dyn CatalogTransport>,
	token: &CancellationToken,
	events: &UnboundedSender<SourceEvent>,
) {
	for request in requests {
		let transport = transport.clone();
		let token = token.clone();
		let events = events.clone();

		tokio::spawn(async move {
			let timeout = Duration::from_millis(request.timeout);
			let work = {
				let request = request.clone();

				tokio::spawn(async move { transport.query(&request).await })
			};
			let abort = work.abort_handle();
			let outcome = tokio::select! {
				biased;
				_ = token.cancelled() => {
					abort.abort();

					return;
				},
				res = tokio::time::timeout(timeout, work) => match res {
					Ok(Ok(outcome)) => outcome,
					Ok(Err(err)) => Err(SourceFailure::Failed {
						message: format!("Source request did not complete: {err}."),
					}),
					Err(_) => {
						abort.abort();

						Err(SourceFailure::Timeout)
					},
				},
			};

			if let Err(err) = &outcome {
				tracing::warn!(sources = ?request.sources, error = %err, "Source request failed.");
			}

			let _ = events.send(SourceEvent { batch_id: request.batch_id, request, outcome });
		});
	}
}
