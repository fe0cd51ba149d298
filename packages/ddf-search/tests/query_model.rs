use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use serde_json::{Map, Value};
use uuid::Uuid;

use ddf_cql::Filter;
use ddf_search::{
	BoxFuture, CatalogTransport, Federation, Metacard, PreQueryHook, Query, QueryEvent, QueryModel,
	QueryResponse, QueryState, RawResult, RequestGroup, SearchContext, SearchOptions,
	SearchOutcome, SearchRequest, SortDirection, SortSpec, Source, SourceClass, SourceFailure,
	SourceRegistry, StaticPreferences, StatusReport, Subscription,
};

const LOCAL: &str = "ddf.distribution";

#[derive(Clone)]
enum Answer {
	Records(Vec<String>),
	Fail(SourceFailure),
}

#[derive(Clone)]
struct Listing {
	answer: Answer,
	delay: Duration,
}

/// Catalog double that pages through a fixed id list per source.
#[derive(Default)]
struct StubCatalog {
	listings: Mutex<HashMap<String, Listing>>,
	received: Mutex<Vec<SearchRequest>>,
}
impl StubCatalog {
	fn records(&self, source_id: &str, ids: &[&str]) {
		let ids = ids.iter().map(|id| id.to_string()).collect();

		self.listings().insert(
			source_id.to_string(),
			Listing { answer: Answer::Records(ids), delay: Duration::ZERO },
		);
	}

	fn numbered(&self, source_id: &str, hits: usize) {
		let ids: Vec<String> = (1..=hits).map(|n| format!("doc-{n}")).collect();
		let ids: Vec<&str> = ids.iter().map(String::as_str).collect();

		self.records(source_id, &ids);
	}

	fn fail(&self, source_id: &str, failure: SourceFailure) {
		self.listings().insert(
			source_id.to_string(),
			Listing { answer: Answer::Fail(failure), delay: Duration::ZERO },
		);
	}

	fn delay(&self, source_id: &str, delay: Duration) {
		let mut listings = self.listings();
		let listing = listings.entry(source_id.to_string()).or_insert_with(|| Listing {
			answer: Answer::Records(Vec::new()),
			delay: Duration::ZERO,
		});

		listing.delay = delay;
	}

	fn received(&self) -> Vec<SearchRequest> {
		self.received.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	fn listings(&self) -> std::sync::MutexGuard<'_, HashMap<String, Listing>> {
		self.listings.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn answer(&self, request: &SearchRequest) -> (Duration, Result<QueryResponse, SourceFailure>) {
		let listings = self.listings();
		let mut delay = Duration::ZERO;
		let mut response = QueryResponse::default();

		for source_id in &request.sources {
			let listing = listings.get(source_id).cloned().unwrap_or(Listing {
				answer: Answer::Records(Vec::new()),
				delay: Duration::ZERO,
			});

			delay = delay.max(listing.delay);

			let ids = match listing.answer {
				Answer::Records(ids) => ids,
				Answer::Fail(failure) => return (delay, Err(failure)),
			};
			let first = (request.start as usize).saturating_sub(1).min(ids.len());
			let last = (first + request.count as usize).min(ids.len());

			for id in &ids[first..last] {
				let mut properties = Map::new();

				properties.insert("id".to_string(), Value::from(id.as_str()));
				properties.insert("source-id".to_string(), Value::from(source_id.as_str()));

				response.results.push(RawResult {
					metacard: Metacard { properties },
					relevance: None,
					distance: None,
				});
			}

			response.status.push(StatusReport {
				id: source_id.clone(),
				hits: Some(ids.len() as u64),
				count: Some((last - first) as u64),
				successful: Some(true),
				..StatusReport::default()
			});
		}

		(delay, Ok(response))
	}
}
impl CatalogTransport for StubCatalog {
	fn query<'a>(
		&'a self,
		request: &'a SearchRequest,
	) -> BoxFuture<'a, Result<QueryResponse, SourceFailure>> {
		self.received.lock().unwrap_or_else(|err| err.into_inner()).push(request.clone());

		let (delay, outcome) = self.answer(request);

		Box::pin(async move {
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			outcome
		})
	}
}

struct DropAll;
impl PreQueryHook for DropAll {
	fn prepare<'a>(&'a self, _requests: Vec<SearchRequest>) -> BoxFuture<'a, Vec<SearchRequest>> {
		Box::pin(async move { Vec::new() })
	}
}

/// Keeps the cache out of the round and sends siteA a different query under a fresh batch id.
struct NarrowSiteA;
impl PreQueryHook for NarrowSiteA {
	fn prepare<'a>(&'a self, requests: Vec<SearchRequest>) -> BoxFuture<'a, Vec<SearchRequest>> {
		Box::pin(async move {
			requests
				.into_iter()
				.filter(|request| request.group != RequestGroup::Cache)
				.map(|request| {
					if request.group == RequestGroup::Federated("siteA".to_string()) {
						SearchRequest {
							cql: "title = 'rewritten'".to_string(),
							batch_id: Uuid::new_v4(),
							..request
						}
					} else {
						request
					}
				})
				.collect()
		})
	}
}

/// Panics for one source and defers to the stub for the rest.
struct PanicsFor {
	source_id: &'static str,
	inner: Arc<StubCatalog>,
}
impl CatalogTransport for PanicsFor {
	fn query<'a>(
		&'a self,
		request: &'a SearchRequest,
	) -> BoxFuture<'a, Result<QueryResponse, SourceFailure>> {
		if request.sources.iter().any(|id| id == self.source_id) {
			panic!("Transport broke for {}.", self.source_id);
		}

		self.inner.query(request)
	}
}

fn registry(cache_enabled: bool) -> SourceRegistry {
	SourceRegistry::new(LOCAL, cache_enabled)
		.with_source(Source::federated("siteA"))
		.with_source(Source::federated("siteB"))
}

fn context(catalog: &Arc<StubCatalog>, registry: SourceRegistry) -> SearchContext {
	SearchContext::new(registry, Arc::new(StaticPreferences { result_count: 10 }), catalog.clone())
}

fn query(cql: &str, federation: Federation, sources: &[&str]) -> Query {
	let mut query = Query::new("Test");

	query.filter = ddf_cql::parse(cql).expect("Failed to parse query text.");
	query.federation = federation;
	query.sources = sources.iter().map(|id| id.to_string()).collect();

	query
}

fn model(catalog: &Arc<StubCatalog>, registry: SourceRegistry, query: Query) -> QueryModel {
	QueryModel::new(query, context(catalog, registry))
}

fn dispatched(outcome: SearchOutcome) -> Vec<SearchRequest> {
	match outcome {
		SearchOutcome::Dispatched { requests, .. } => requests,
		other => panic!("Expected a dispatched search, got {other:?}."),
	}
}

fn drain(events: &mut Subscription) -> Vec<QueryEvent> {
	let mut out = Vec::new();

	while let Some(event) = events.try_recv() {
		out.push(event);
	}

	out
}

fn result_ids(model: &QueryModel) -> Vec<String> {
	model
		.results()
		.map(|results| results.records().iter().map(|record| record.id().to_string()).collect())
		.unwrap_or_default()
}

#[tokio::test]
async fn dispatches_local_site_and_cache_requests() {
	let catalog = Arc::new(StubCatalog::default());
	let mut model = model(
		&catalog,
		registry(true),
		query("anyText ILIKE 'foo'", Federation::Selected, &[LOCAL, "siteA"]),
	);
	let requests = dispatched(
		model.start_search(SearchOptions::default()).await.expect("Failed to start search."),
	);
	let groups: Vec<RequestGroup> = requests.iter().map(|request| request.group.clone()).collect();

	assert_eq!(
		groups,
		vec![RequestGroup::Local, RequestGroup::Federated("siteA".to_string()), RequestGroup::Cache]
	);
	assert!(requests.iter().all(|request| request.start == 1));
	assert_eq!(requests[0].sources, vec![LOCAL]);
	assert_eq!(requests[1].cql, "anyText ILIKE 'foo'");
	assert_eq!(
		requests[2].cql,
		"anyText ILIKE 'foo' AND \
		 (metacard_source = 'ddf.distribution' OR metacard_source = 'siteA')"
	);

	model.wait_until_settled().await;

	assert_eq!(catalog.received().len(), 3);
	assert_eq!(model.state(), QueryState::Settled);
	assert!(!model.statuses().is_pending());
}

#[tokio::test]
async fn local_offsets_advance_to_hits_plus_one() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.numbered(LOCAL, 25);

	let mut model =
		model(&catalog, registry(false), query("anyText ILIKE '*'", Federation::Local, &[]));

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	model.wait_until_settled().await;

	assert_eq!(model.total_hits(), 25);
	assert_eq!(model.results_range_label(10), "1-10 of 25");
	assert!(model.has_next_server_page());

	let mut starts = Vec::new();

	for _ in 0..4 {
		let requests = dispatched(model.get_next_server_page().await.expect("Failed to page."));

		starts.push(requests[0].start);

		model.wait_until_settled().await;
	}

	assert_eq!(starts, vec![11, 21, 26, 26]);
	assert!(!model.has_next_server_page());
	assert!(model.has_previous_server_page());
}

#[tokio::test]
async fn previous_pages_restore_exact_offsets() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.numbered(LOCAL, 25);

	let mut model =
		model(&catalog, registry(false), query("anyText ILIKE '*'", Federation::Local, &[]));

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	model.wait_until_settled().await;

	for _ in 0..2 {
		model.get_next_server_page().await.expect("Failed to page.");
		model.wait_until_settled().await;
	}

	assert_eq!(model.results_range_label(5), "21-25 of 25");

	let mut starts = Vec::new();

	for _ in 0..2 {
		let requests = dispatched(model.get_previous_server_page().await.expect("Failed to page."));

		starts.push(requests[0].start);

		model.wait_until_settled().await;
	}

	assert_eq!(starts, vec![11, 1]);
	assert!(!model.has_previous_server_page());
	assert_eq!(
		model.get_previous_server_page().await.expect("Failed to page."),
		SearchOutcome::NoPreviousPage
	);
	assert_eq!(result_ids(&model).len(), 10);
}

#[tokio::test]
async fn new_search_discards_the_previous_round() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records("siteA", &["old"]);
	catalog.delay("siteA", Duration::from_millis(300));

	let mut model =
		model(&catalog, registry(false), query("title = 'old'", Federation::Selected, &["siteA"]));
	let mut events = model.subscribe();
	let first = match model.start_search(SearchOptions::default()).await {
		Ok(SearchOutcome::Dispatched { batch_id, .. }) => batch_id,
		other => panic!("Expected a dispatched search, got {other:?}."),
	};

	catalog.records("siteA", &["new"]);
	model.set_cql("title = 'new'").expect("Failed to set query text.");
	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	model.wait_until_settled().await;
	tokio::time::sleep(Duration::from_millis(400)).await;

	assert_eq!(model.poll_ready(), 0);
	assert_eq!(result_ids(&model), vec!["new"]);
	assert!(drain(&mut events).contains(&QueryEvent::Cancelled { batch_id: first }));
}

#[tokio::test]
async fn cancel_keeps_merged_results_and_stops_waiting() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records("siteA", &["a1"]);
	catalog.records("siteB", &["b1"]);
	catalog.delay("siteB", Duration::from_millis(300));

	let mut model = model(
		&catalog,
		registry(false),
		query("title = 'x'", Federation::Selected, &["siteA", "siteB"]),
	);

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");

	assert!(model.next_update().await);
	assert_eq!(model.state(), QueryState::Searching);

	model.cancel_current_searches();

	let site_b = model.statuses().get("siteB").cloned().expect("Missing siteB status.");

	assert!(!model.statuses().is_pending());
	assert_eq!(site_b.successful, None);
	assert_eq!(result_ids(&model), vec!["a1"]);
	assert!(!model.next_update().await);
}

#[tokio::test]
async fn tiered_search_escalates_when_ids_are_missing() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records(LOCAL, &["x"]);
	catalog.records("siteA", &["a", "b"]);

	let mut model =
		model(&catalog, registry(false), query("title = 'x'", Federation::Enterprise, &[]));
	let tiered = model
		.start_tiered_search(&["a".to_string(), "b".to_string()])
		.await
		.expect("Failed to run tiered search.");

	assert!(tiered.escalated);
	assert_eq!(model.query().federation, Federation::Enterprise);

	model.wait_until_settled().await;

	let ids = result_ids(&model);

	assert!(["x", "a", "b"].iter().all(|id| ids.contains(&id.to_string())));
	assert_eq!(ids.len(), 3);
	assert_eq!(model.statuses().get("siteA").and_then(|status| status.successful), Some(true));
}

#[tokio::test]
async fn tiered_search_stays_local_when_ids_are_found() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records(LOCAL, &["x"]);
	catalog.records("siteA", &["a"]);

	let mut model =
		model(&catalog, registry(false), query("title = 'x'", Federation::Enterprise, &[]));
	let tiered =
		model.start_tiered_search(&["x".to_string()]).await.expect("Failed to run tiered search.");

	assert!(!tiered.escalated);
	assert_eq!(model.query().federation, Federation::Local);
	assert!(catalog.received().iter().all(|request| request.sources == vec![LOCAL]));
}

#[tokio::test]
async fn unauthorized_source_does_not_block_siblings() {
	let catalog = Arc::new(StubCatalog::default());
	let login = "https://siteA.example/login".to_string();

	catalog.fail(
		"siteA",
		SourceFailure::Unauthorized { source_id: "siteA".to_string(), url: Some(login.clone()) },
	);
	catalog.records("siteB", &["b1"]);
	catalog.delay("siteB", Duration::from_millis(50));

	let mut model = model(
		&catalog,
		registry(false),
		query("title = 'x'", Federation::Selected, &["siteA", "siteB"]),
	);
	let mut events = model.subscribe();

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	model.wait_until_settled().await;

	let site_a = model.statuses().get("siteA").cloned().expect("Missing siteA status.");
	let site_b = model.statuses().get("siteB").cloned().expect("Missing siteB status.");

	assert_eq!((site_a.pending, site_a.successful), (false, Some(false)));
	assert_eq!((site_b.pending, site_b.successful), (false, Some(true)));
	assert_eq!(result_ids(&model), vec!["b1"]);
	assert!(drain(&mut events).contains(&QueryEvent::AuthenticationRequired {
		source_id: "siteA".to_string(),
		url: Some(login),
	}));
}

#[tokio::test]
async fn timed_out_source_is_marked_unsuccessful() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records("siteA", &["a1"]);
	catalog.delay("siteA", Duration::from_millis(500));
	catalog.records("siteB", &["b1"]);

	let ctx = context(&catalog, registry(false)).with_timeout(Duration::from_millis(50));
	let mut model =
		QueryModel::new(query("title = 'x'", Federation::Selected, &["siteA", "siteB"]), ctx);

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	model.wait_until_settled().await;

	assert_eq!(model.statuses().get("siteA").and_then(|status| status.successful), Some(false));
	assert_eq!(model.statuses().get("siteB").and_then(|status| status.successful), Some(true));
	assert_eq!(result_ids(&model), vec!["b1"]);
}

#[tokio::test]
async fn panicking_transport_fails_only_its_source() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records("siteB", &["b1"]);

	let transport = Arc::new(PanicsFor { source_id: "siteA", inner: catalog.clone() });
	let ctx = SearchContext::new(
		registry(false),
		Arc::new(StaticPreferences { result_count: 10 }),
		transport,
	);
	let mut model =
		QueryModel::new(query("title = 'x'", Federation::Selected, &["siteA", "siteB"]), ctx);

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	tokio::time::timeout(Duration::from_secs(2), model.wait_until_settled())
		.await
		.expect("Search round did not settle.");

	assert!(!model.statuses().is_pending());
	assert_eq!(model.statuses().get("siteA").and_then(|status| status.successful), Some(false));
	assert_eq!(model.statuses().get("siteB").and_then(|status| status.successful), Some(true));
	assert_eq!(result_ids(&model), vec!["b1"]);
}

#[tokio::test]
async fn hook_can_drop_and_rewrite_requests() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.records(LOCAL, &["l1"]);
	catalog.records("siteA", &["a1"]);

	let ctx = context(&catalog, registry(true)).with_hook(Arc::new(NarrowSiteA));
	let mut model =
		QueryModel::new(query("title = 'x'", Federation::Selected, &[LOCAL, "siteA"]), ctx);
	let outcome = model.start_search(SearchOptions::default()).await.expect("Failed to search.");
	let (batch_id, requests) = match outcome {
		SearchOutcome::Dispatched { batch_id, requests } => (batch_id, requests),
		other => panic!("Expected a dispatched search, got {other:?}."),
	};

	assert_eq!(requests.len(), 2);
	assert!(requests.iter().all(|request| request.batch_id == batch_id));

	tokio::time::timeout(Duration::from_secs(2), model.wait_until_settled())
		.await
		.expect("Search round did not settle.");

	let received = catalog.received();
	let mut ids = result_ids(&model);

	ids.sort();

	assert_eq!(received.len(), 2);
	assert!(received.iter().any(|request| request.cql == "title = 'rewritten'"));
	assert!(received.iter().all(|request| request.group != RequestGroup::Cache));
	assert_eq!(model.statuses().len(), 2);
	assert!(model.statuses().get("cache").is_none());
	assert!(!model.statuses().is_pending());
	assert_eq!(model.state(), QueryState::Settled);
	assert_eq!(ids, vec!["a1", "l1"]);
}

#[tokio::test]
async fn empty_dispatch_warns_without_network() {
	let catalog = Arc::new(StubCatalog::default());
	let ctx = context(&catalog, registry(true)).with_hook(Arc::new(DropAll));
	let mut model = QueryModel::new(query("title = 'x'", Federation::Enterprise, &[]), ctx);
	let mut events = model.subscribe();
	let outcome = model.start_search(SearchOptions::default()).await.expect("Failed to search.");

	assert_eq!(outcome, SearchOutcome::NothingToRun);
	assert!(catalog.received().is_empty());
	assert_eq!(model.state(), QueryState::Idle);
	assert!(drain(&mut events).iter().any(|event| matches!(
		event,
		QueryEvent::Warning { title, .. } if title == "Search \"Test\" cannot be run."
	)));
}

#[tokio::test]
async fn empty_selection_and_empty_filter_do_not_search() {
	let catalog = Arc::new(StubCatalog::default());
	let mut model =
		model(&catalog, registry(true), query("title = 'x'", Federation::Selected, &[]));

	assert_eq!(
		model.start_search(SearchOptions::default()).await.expect("Failed to search."),
		SearchOutcome::NothingToRun
	);

	model.set_filter(Filter::And(Vec::new()));

	assert_eq!(
		model.start_search(SearchOptions::default()).await.expect("Failed to search."),
		SearchOutcome::EmptyFilter
	);
	assert!(!model.is_outdated());
	assert!(catalog.received().is_empty());
}

#[tokio::test]
async fn search_options_shape_the_payload() {
	let catalog = Arc::new(StubCatalog::default());
	let mut model =
		model(&catalog, registry(false), query("anyText ILIKE 'foo'", Federation::Local, &[]));
	let deleted = dispatched(
		model
			.start_search(SearchOptions { limit_to_deleted: true, ..SearchOptions::default() })
			.await
			.expect("Failed to search."),
	);

	assert_eq!(deleted[0].cql, "anyText ILIKE 'foo' AND \"metacard-tags\" ILIKE 'deleted'");
	assert_eq!(deleted[0].count, 10);

	let historic = dispatched(
		model
			.start_search(SearchOptions {
				limit_to_historic: true,
				result_count_only: true,
				..SearchOptions::default()
			})
			.await
			.expect("Failed to search."),
	);

	assert_eq!(historic[0].cql, "anyText ILIKE 'foo' AND \"metacard-tags\" ILIKE 'revision'");
	assert_eq!(historic[0].count, 0);
}

#[tokio::test]
async fn deleted_tag_applies_to_every_branch_of_a_wrapped_tree() {
	let catalog = Arc::new(StubCatalog::default());
	let mut saved = Query::new("Wrapped");

	saved.filter = Filter::And(vec![Filter::Or(vec![Filter::Or(vec![
		Filter::ilike("anyText", "a"),
		Filter::ilike("anyText", "b"),
	])])]);
	saved.federation = Federation::Local;

	let mut model = model(&catalog, registry(true), saved);
	let requests = dispatched(
		model
			.start_search(SearchOptions { limit_to_deleted: true, ..SearchOptions::default() })
			.await
			.expect("Failed to search."),
	);

	assert_eq!(
		requests[0].cql,
		"(anyText ILIKE 'a' OR anyText ILIKE 'b') AND \"metacard-tags\" ILIKE 'deleted'"
	);
	assert_eq!(
		requests[1].cql,
		"((anyText ILIKE 'a' OR anyText ILIKE 'b') AND \"metacard-tags\" ILIKE 'deleted') AND \
		 metacard_source = 'ddf.distribution'"
	);
}

#[tokio::test]
async fn editing_sorts_marks_outdated_and_resets_paging() {
	let catalog = Arc::new(StubCatalog::default());

	catalog.numbered(LOCAL, 25);

	let mut model =
		model(&catalog, registry(false), query("anyText ILIKE '*'", Federation::Local, &[]));
	let mut events = model.subscribe();

	model.start_search(SearchOptions::default()).await.expect("Failed to start search.");
	model.wait_until_settled().await;
	model.get_next_server_page().await.expect("Failed to page.");
	model.wait_until_settled().await;
	model.set_sorts(vec![SortSpec::new("id", SortDirection::Descending)]);

	assert!(model.is_outdated());
	assert!(!model.has_previous_server_page());
	assert!(drain(&mut events).contains(&QueryEvent::Outdated));

	let outcome = model
		.start_search_if_outdated()
		.await
		.expect("Failed to search.")
		.expect("Expected an outdated query to search.");

	assert_eq!(dispatched(outcome)[0].start, 1);
	assert!(model.start_search_if_outdated().await.expect("Failed to search.").is_none());
}

#[test]
fn selects_only_available_sources_from_registry() {
	let catalog = Arc::new(StubCatalog::default());
	let registry = registry(false).with_source(Source {
		id: "siteB".to_string(),
		class: SourceClass::Federated,
		available: false,
	});
	let mut model = model(&catalog, registry, query("title = 'x'", Federation::Selected, &[]));

	model.set_sources_from_registry();

	assert_eq!(model.selected_sources(), vec![LOCAL.to_string(), "siteA".to_string()]);
	assert!(model.is_outdated());
}
