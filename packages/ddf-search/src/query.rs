use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::{
	broadcast::{self, error::RecvError},
	mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ddf_cql::Filter;

use crate::{
	Error, RequestGroup, Result, ResultRecord, ResultSet, SearchContext, SearchRequest,
	SourceFailure, SourceStatus, StatusBoard,
	dispatch::{self, SourceEvent},
	paging::PageTracker,
	results::SortSpec,
};

const EVENT_CAPACITY: usize = 256;
const TAGS_PROPERTY: &str = "metacard-tags";

/// Which sources a query targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Federation {
	/// The local catalog only.
	Local,
	/// Every registered source.
	#[default]
	Enterprise,
	/// The query's explicit source list.
	Selected,
}
impl Federation {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"local" => Some(Self::Local),
			"enterprise" => Some(Self::Enterprise),
			"selected" => Some(Self::Selected),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
	pub id: String,
	pub title: String,
	pub filter: Filter,
	pub sorts: Vec<SortSpec>,
	pub federation: Federation,
	pub sources: Vec<String>,
	pub spellcheck: bool,
	pub phonetics: bool,
	pub outdated: bool,
}
impl Query {
	pub fn new(title: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			title: title.into(),
			filter: default_filter(),
			sorts: vec![SortSpec::new("modified", crate::SortDirection::Descending)],
			federation: Federation::default(),
			sources: Vec::new(),
			spellcheck: false,
			phonetics: false,
			outdated: false,
		}
	}

	/// A query carrying the configured federation, sorts and search flags.
	pub fn with_defaults(title: impl Into<String>, cfg: &ddf_config::Search) -> Result<Self> {
		let federation = Federation::parse(&cfg.federation).ok_or_else(|| Error::Config {
			message: format!("unknown federation '{}'.", cfg.federation),
		})?;
		let sorts = cfg
			.sorts
			.iter()
			.map(|sort| {
				SortSpec::parse(&sort.attribute, &sort.direction).ok_or_else(|| Error::Config {
					message: format!("unknown sort direction '{}'.", sort.direction),
				})
			})
			.collect::<Result<Vec<_>>>()?;

		Ok(Self {
			federation,
			sorts,
			spellcheck: cfg.spellcheck,
			phonetics: cfg.phonetics,
			..Self::new(title)
		})
	}

	/// Restores a saved search. A tree that no longer decodes is rebuilt from the saved text.
	pub fn from_saved(saved: SavedQuery) -> Result<Self> {
		let tree = match &saved.filter_tree {
			Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
				.map_err(|err| err.to_string())
				.and_then(|value| Filter::from_value(&value).map_err(|err| err.to_string())),
			Some(Value::Null) | None => Err(String::new()),
			Some(value) => Filter::from_value(value).map_err(|err| err.to_string()),
		};
		let filter = match tree {
			Ok(filter) => filter,
			Err(_) if saved.cql.trim().is_empty() => default_filter(),
			Err(reason) => {
				if !reason.is_empty() {
					tracing::warn!(
						title = %saved.title,
						reason = %reason,
						"Saved filter tree is unreadable. Rebuilding it from the query text."
					);
				}

				ddf_cql::parse(&saved.cql)?
			},
		};
		let mut query = Self::new(saved.title);

		if let Some(id) = saved.id.filter(|id| !id.trim().is_empty()) {
			query.id = id;
		}
		if !saved.sorts.is_empty() {
			query.sorts = saved.sorts;
		}

		query.filter = filter;
		query.federation = saved.federation.unwrap_or_default();
		query.sources = saved.sources;
		query.spellcheck = saved.spellcheck;
		query.phonetics = saved.phonetics;

		Ok(query)
	}

	pub fn to_saved(&self) -> SavedQuery {
		SavedQuery {
			id: Some(self.id.clone()),
			title: self.title.clone(),
			cql: self.cql(),
			filter_tree: Some(Value::String(self.filter.to_value().to_string())),
			sorts: self.sorts.clone(),
			federation: Some(self.federation),
			sources: self.sources.clone(),
			spellcheck: self.spellcheck,
			phonetics: self.phonetics,
		}
	}

	pub fn cql(&self) -> String {
		self.filter.to_cql()
	}
}

/// Stored form of a search. `filterTree` is written as a JSON string and read as either a string
/// or an object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub cql: String,
	#[serde(default)]
	pub filter_tree: Option<Value>,
	#[serde(default)]
	pub sorts: Vec<SortSpec>,
	#[serde(default)]
	pub federation: Option<Federation>,
	#[serde(default, deserialize_with = "list_or_csv")]
	pub sources: Vec<String>,
	#[serde(default)]
	pub spellcheck: bool,
	#[serde(default)]
	pub phonetics: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
	/// Only metacards tagged `deleted`.
	pub limit_to_deleted: bool,
	/// Only metacards tagged `revision`. Ignored when `limit_to_deleted` is set.
	pub limit_to_historic: bool,
	/// Ask every source for hit counts only.
	pub result_count_only: bool,
	pub seed_results: Vec<ResultRecord>,
	pub seed_statuses: Vec<SourceStatus>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SearchOutcome {
	Dispatched { batch_id: Uuid, requests: Vec<SearchRequest> },
	/// The filter renders to empty text. Nothing was changed.
	EmptyFilter,
	/// No request survived partitioning and the pre-query hook.
	NothingToRun,
	NoPreviousPage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TieredOutcome {
	pub escalated: bool,
	pub outcome: SearchOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
	SearchStarted { batch_id: Uuid },
	StatusChanged(SourceStatus),
	ResultsChanged { total: usize, queued: usize },
	Settled { batch_id: Uuid },
	Cancelled { batch_id: Uuid },
	Outdated,
	Warning { title: String, message: String },
	AuthenticationRequired { source_id: String, url: Option<String> },
}

/// Receiving end of a model's notifications. Dropping it, or calling
/// [`Subscription::unsubscribe`], detaches it.
pub struct Subscription {
	rx: broadcast::Receiver<QueryEvent>,
}
impl Subscription {
	pub async fn recv(&mut self) -> Option<QueryEvent> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Subscriber fell behind. Skipping query events.");
				},
				Err(RecvError::Closed) => return None,
			}
		}
	}

	pub fn try_recv(&mut self) -> Option<QueryEvent> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
				Err(_) => return None,
			}
		}
	}

	pub fn unsubscribe(self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
	Idle,
	Searching,
	Settled,
}

struct Round {
	batch_id: Uuid,
	token: CancellationToken,
	outstanding: usize,
}

/// Owns one query and drives its rounds of federated requests.
///
/// The model is single-owner: every mutation goes through `&mut self`, and responses are applied
/// only when the owner pulls them with [`QueryModel::next_update`],
/// [`QueryModel::wait_until_settled`] or [`QueryModel::poll_ready`].
pub struct QueryModel {
	query: Query,
	ctx: SearchContext,
	tracker: PageTracker,
	statuses: StatusBoard,
	results: Option<ResultSet>,
	round: Option<Round>,
	events_tx: UnboundedSender<SourceEvent>,
	events_rx: UnboundedReceiver<SourceEvent>,
	notify: broadcast::Sender<QueryEvent>,
	searched: bool,
}
impl QueryModel {
	pub fn new(query: Query, ctx: SearchContext) -> Self {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (notify, _) = broadcast::channel(EVENT_CAPACITY);

		Self {
			query,
			ctx,
			tracker: PageTracker::new(),
			statuses: StatusBoard::default(),
			results: None,
			round: None,
			events_tx,
			events_rx,
			notify,
			searched: false,
		}
	}

	pub fn subscribe(&self) -> Subscription {
		Subscription { rx: self.notify.subscribe() }
	}

	pub fn query(&self) -> &Query {
		&self.query
	}

	pub fn statuses(&self) -> &StatusBoard {
		&self.statuses
	}

	pub fn results(&self) -> Option<&ResultSet> {
		self.results.as_ref()
	}

	pub fn tracker(&self) -> &PageTracker {
		&self.tracker
	}

	pub fn state(&self) -> QueryState {
		match (&self.round, self.searched) {
			(Some(_), _) => QueryState::Searching,
			(None, true) => QueryState::Settled,
			(None, false) => QueryState::Idle,
		}
	}

	pub fn is_outdated(&self) -> bool {
		self.query.outdated
	}

	pub fn set_filter(&mut self, filter: Filter) {
		self.query.filter = filter;

		self.mark_outdated();
	}

	pub fn set_cql(&mut self, cql: &str) -> Result<()> {
		let filter = ddf_cql::parse(cql)?;

		self.set_filter(filter);

		Ok(())
	}

	pub fn set_sorts(&mut self, sorts: Vec<SortSpec>) {
		if let Some(results) = &mut self.results {
			results.set_sorts(sorts.clone());
		}

		self.query.sorts = sorts;

		self.mark_outdated();
	}

	pub fn set_federation(&mut self, federation: Federation) {
		self.query.federation = federation;

		self.mark_outdated();
	}

	pub fn set_sources(&mut self, sources: Vec<String>) {
		self.query.sources = sources;

		self.mark_outdated();
	}

	/// Selects every source the registry reports as available.
	pub fn set_sources_from_registry(&mut self) {
		let sources = self.ctx.registry.available_ids();

		self.set_sources(sources);
	}

	/// Page size changed, so every stored offset is stale.
	pub fn preferences_changed(&mut self) {
		self.tracker.reset();
	}

	pub fn set_auto_merge(&mut self, auto_merge: bool) {
		if let Some(results) = &mut self.results {
			results.set_auto_merge(auto_merge);
		}
	}

	pub fn merge_results(&mut self) {
		if let Some(results) = &mut self.results {
			results.merge();

			let event = QueryEvent::ResultsChanged { total: results.len(), queued: 0 };

			self.emit(event);
		}
	}

	pub fn selected_sources(&self) -> Vec<String> {
		match self.query.federation {
			Federation::Local => vec![self.ctx.registry.local_catalog().to_string()],
			Federation::Enterprise => self.ctx.registry.ids(),
			Federation::Selected => self.query.sources.clone(),
		}
	}

	pub fn total_hits(&self) -> u64 {
		self.statuses.total_hits()
	}

	/// Describes the `visible` records of the current page, such as `"11-20 of 25"`.
	pub fn results_range_label(&self, visible: usize) -> String {
		let hits = self.total_hits();
		let visible = visible as u64;

		if visible == 0 {
			return "0 results".to_string();
		}
		if visible > hits {
			return format!("{visible} results");
		}

		let page_size = u64::from(self.ctx.preferences.result_count());
		let start = self.tracker.page_index() as u64 * page_size;

		format!("{}-{} of {hits}", start + 1, start + visible)
	}

	pub async fn start_search(&mut self, options: SearchOptions) -> Result<SearchOutcome> {
		self.query.outdated = false;

		if self.query.filter.is_empty() {
			return Ok(SearchOutcome::EmptyFilter);
		}

		let page_size = self.ctx.preferences.result_count();

		if page_size == 0 && !options.result_count_only {
			return Err(Error::InvalidRequest {
				message: "result_count preference must be greater than zero.".to_string(),
			});
		}

		self.cancel_current_searches();

		let batch_id = Uuid::new_v4();
		let selected = self.selected_sources();
		let filter = if options.limit_to_deleted {
			self.query.filter.clone().and(Filter::ilike(TAGS_PROPERTY, "deleted"))
		} else if options.limit_to_historic {
			self.query.filter.clone().and(Filter::ilike(TAGS_PROPERTY, "revision"))
		} else {
			self.query.filter.clone()
		};
		let base = SearchRequest {
			sources: Vec::new(),
			cql: filter.to_cql(),
			start: 1,
			count: if options.result_count_only { 0 } else { page_size },
			sorts: self.query.sorts.clone(),
			timeout: self.ctx.timeout.as_millis().try_into().unwrap_or(u64::MAX),
			id: self.query.id.clone(),
			batch_id,
			spellcheck: self.query.spellcheck,
			phonetics: self.query.phonetics,
			group: RequestGroup::Local,
		};

		match &mut self.results {
			Some(results) => results.reset(self.query.sorts.clone(), options.seed_results),
			None => {
				let mut results = ResultSet::new(self.query.sorts.clone());

				results.reset(self.query.sorts.clone(), options.seed_results);

				self.results = Some(results);
			},
		}

		self.tracker.begin_round();

		let mut requests =
			dispatch::build_requests(&base, &selected, &self.ctx.registry, &self.tracker);

		if let Some(hook) = self.ctx.hook.clone() {
			requests = hook.prepare(requests).await;

			// Late events are matched on the round id, so a hook cannot move a request out of it.
			for request in &mut requests {
				request.batch_id = batch_id;
			}
		}

		if requests.is_empty() {
			self.statuses.reset(&[], options.seed_statuses);

			tracing::warn!(query_id = %self.query.id, "Search has no runnable requests.");

			self.emit(QueryEvent::Warning {
				title: format!("Search \"{}\" cannot be run.", self.query.title),
				message: "No sources are selected.".to_string(),
			});

			return Ok(SearchOutcome::NothingToRun);
		}

		let mut ids: Vec<String> = Vec::new();

		for id in requests.iter().flat_map(|request| request.sources.iter()) {
			if !ids.contains(id) {
				ids.push(id.clone());
			}
		}

		self.statuses.reset(&ids, options.seed_statuses);

		let token = CancellationToken::new();

		dispatch::spawn_requests(
			requests.clone(),
			self.ctx.transport.clone(),
			&token,
			&self.events_tx,
		);

		tracing::debug!(
			query_id = %self.query.id,
			batch_id = %batch_id,
			requests = requests.len(),
			"Dispatched search round."
		);

		self.round = Some(Round { batch_id, token, outstanding: requests.len() });
		self.searched = true;

		self.emit(QueryEvent::SearchStarted { batch_id });

		Ok(SearchOutcome::Dispatched { batch_id, requests })
	}

	pub async fn start_search_if_outdated(&mut self) -> Result<Option<SearchOutcome>> {
		if !self.query.outdated {
			return Ok(None);
		}

		self.start_search(SearchOptions::default()).await.map(Some)
	}

	pub async fn start_search_from_first_page(
		&mut self,
		options: SearchOptions,
	) -> Result<SearchOutcome> {
		self.tracker.reset();

		self.start_search(options).await
	}

	/// Searches the local catalog first and widens to every source only when one of `ids` did
	/// not turn up. The wider round starts from the local round's results and statuses.
	pub async fn start_tiered_search(&mut self, ids: &[String]) -> Result<TieredOutcome> {
		self.query.federation = Federation::Local;

		let outcome = self.start_search(SearchOptions::default()).await?;

		if !matches!(outcome, SearchOutcome::Dispatched { .. }) {
			return Ok(TieredOutcome { escalated: false, outcome });
		}

		self.wait_until_settled().await;

		let Some(results) = &mut self.results else {
			return Ok(TieredOutcome { escalated: false, outcome });
		};

		if results.is_unmerged() {
			results.merge();
		}

		let missing: Vec<&String> = ids.iter().filter(|id| !results.contains(id)).collect();

		if missing.is_empty() {
			return Ok(TieredOutcome { escalated: false, outcome });
		}

		tracing::info!(
			query_id = %self.query.id,
			missing = ?missing,
			"Local search missed requested records. Escalating to enterprise."
		);

		let options = SearchOptions {
			seed_results: results.records().to_vec(),
			seed_statuses: self.statuses.snapshot(),
			..SearchOptions::default()
		};

		self.query.federation = Federation::Enterprise;

		let outcome = self.start_search(options).await?;

		Ok(TieredOutcome { escalated: true, outcome })
	}

	pub async fn start_tiered_search_if_outdated(
		&mut self,
		ids: &[String],
	) -> Result<Option<TieredOutcome>> {
		if !self.query.outdated {
			return Ok(None);
		}

		self.start_tiered_search(ids).await.map(Some)
	}

	pub async fn get_next_server_page(&mut self) -> Result<SearchOutcome> {
		let selected = self.selected_sources();

		self.tracker.advance_to_next_page(&selected, &self.ctx.registry, &self.statuses);

		self.start_search(SearchOptions::default()).await
	}

	/// Returns [`SearchOutcome::NoPreviousPage`] without searching when already on the first page.
	pub async fn get_previous_server_page(&mut self) -> Result<SearchOutcome> {
		if !self.tracker.retreat_to_previous_page() {
			return Ok(SearchOutcome::NoPreviousPage);
		}

		self.start_search(SearchOptions::default()).await
	}

	pub fn has_next_server_page(&self) -> bool {
		self.tracker.has_next_page(&self.ctx.registry, &self.statuses)
	}

	pub fn has_previous_server_page(&self) -> bool {
		self.tracker.has_previous_page()
	}

	/// Aborts the running round. Merged results stay; queued ones are dropped.
	pub fn cancel_current_searches(&mut self) {
		if let Some(round) = self.round.take() {
			round.token.cancel();

			tracing::debug!(batch_id = %round.batch_id, "Cancelled search round.");

			self.emit(QueryEvent::Cancelled { batch_id: round.batch_id });
		}

		self.statuses.finish_pending();

		if let Some(results) = &mut self.results {
			results.empty_queue();
		}

		while self.events_rx.try_recv().is_ok() {}
	}

	pub fn clear_results(&mut self) {
		self.cancel_current_searches();

		self.results = None;
		self.searched = false;

		self.statuses.clear();
	}

	/// Waits for the next response of the running round and applies it. Returns `false` once
	/// nothing is outstanding.
	pub async fn next_update(&mut self) -> bool {
		loop {
			let Some(batch_id) = self.round.as_ref().map(|round| round.batch_id) else {
				return false;
			};
			let Some(event) = self.events_rx.recv().await else {
				return false;
			};

			if event.batch_id != batch_id {
				continue;
			}

			self.apply(event);

			return true;
		}
	}

	pub async fn wait_until_settled(&mut self) {
		while self.next_update().await {}
	}

	/// Applies every response that has already arrived without waiting for more.
	pub fn poll_ready(&mut self) -> usize {
		let mut applied = 0;

		while let Some(batch_id) = self.round.as_ref().map(|round| round.batch_id) {
			let Ok(event) = self.events_rx.try_recv() else {
				break;
			};

			if event.batch_id == batch_id {
				self.apply(event);

				applied += 1;
			}
		}

		applied
	}

	fn apply(&mut self, event: SourceEvent) {
		let SourceEvent { batch_id, request, outcome } = event;

		match outcome {
			Ok(response) => {
				let mut changed: Vec<SourceStatus> =
					response.status.iter().map(|report| self.statuses.apply_report(report)).collect();

				changed.extend(self.statuses.complete_request(&request.sources));

				for status in changed {
					self.emit(QueryEvent::StatusChanged(status));
				}

				if let Some(results) = &mut self.results {
					let default_source = request.sources.first().map(String::as_str).unwrap_or("");

					results.add_batch(default_source, response.results);

					if results.auto_merge() {
						results.merge();
					}

					let event =
						QueryEvent::ResultsChanged { total: results.len(), queued: results.queued_len() };

					self.emit(event);
				}
			},
			Err(failure) => {
				if let SourceFailure::Unauthorized { source_id, url } = &failure {
					tracing::warn!(source_id = %source_id, "Source requires authentication.");

					self.emit(QueryEvent::AuthenticationRequired {
						source_id: source_id.clone(),
						url: url.clone(),
					});
				}

				for status in self.statuses.mark_failed(&request.sources) {
					self.emit(QueryEvent::StatusChanged(status));
				}
			},
		}

		let settled = match &mut self.round {
			Some(round) => {
				round.outstanding = round.outstanding.saturating_sub(1);

				round.outstanding == 0
			},
			None => false,
		};

		if settled {
			self.round = None;

			tracing::debug!(batch_id = %batch_id, hits = self.total_hits(), "Search round settled.");

			self.emit(QueryEvent::Settled { batch_id });
		}
	}

	fn mark_outdated(&mut self) {
		self.query.outdated = true;

		self.tracker.reset();
		self.emit(QueryEvent::Outdated);
	}

	fn emit(&self, event: QueryEvent) {
		// No subscribers is not an error.
		let _ = self.notify.send(event);
	}
}
impl Drop for QueryModel {
	fn drop(&mut self) {
		if let Some(round) = &self.round {
			round.token.cancel();
		}
	}
}

fn default_filter() -> Filter {
	Filter::ilike("anyText", "")
}

/// Older saved searches store sources as one comma-separated string.
fn list_or_csv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum ListOrCsv {
		List(Vec<String>),
		Csv(String),
	}

	Ok(match ListOrCsv::deserialize(deserializer)? {
		ListOrCsv::List(sources) => sources,
		ListOrCsv::Csv(raw) => raw
			.split(',')
			.map(str::trim)
			.filter(|id| !id.is_empty())
			.map(str::to_string)
			.collect(),
	})
}
