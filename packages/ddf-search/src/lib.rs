pub mod dispatch;
pub mod paging;
pub mod query;
pub mod response;
pub mod results;
pub mod sources;
pub mod status;

mod error;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

pub use dispatch::{RequestGroup, SearchRequest};
pub use error::{Error, Result, SourceFailure};
pub use paging::{LOCAL_GROUP, OffsetTable, PageTracker};
pub use query::{
	Federation, Query, QueryEvent, QueryModel, QueryState, SavedQuery, SearchOptions,
	SearchOutcome, Subscription, TieredOutcome,
};
pub use response::{Metacard, QueryResponse, RawResult, StatusReport};
pub use results::{ResultRecord, ResultSet, SortDirection, SortSpec};
pub use sources::{CACHE_SOURCE_ID, Source, SourceClass, SourceRegistry};
pub use status::{SourceStatus, StatusBoard};

use ddf_providers::catalog::CatalogClient;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends one source-group request and decodes the catalog's answer.
pub trait CatalogTransport
where
	Self: Send + Sync,
{
	fn query<'a>(
		&'a self,
		request: &'a SearchRequest,
	) -> BoxFuture<'a, std::result::Result<QueryResponse, SourceFailure>>;
}

/// Rewrites or filters the outbound requests of a round before any network I/O.
pub trait PreQueryHook
where
	Self: Send + Sync,
{
	fn prepare<'a>(&'a self, requests: Vec<SearchRequest>) -> BoxFuture<'a, Vec<SearchRequest>>;
}

/// User preferences read at the start of every round.
pub trait Preferences
where
	Self: Send + Sync,
{
	fn result_count(&self) -> u32;
}

#[derive(Clone, Copy, Debug)]
pub struct StaticPreferences {
	pub result_count: u32,
}
impl Preferences for StaticPreferences {
	fn result_count(&self) -> u32 {
		self.result_count
	}
}

/// Transport backed by the catalog HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpTransport {
	client: CatalogClient,
}
impl HttpTransport {
	pub fn new(client: CatalogClient) -> Self {
		Self { client }
	}

	async fn send(
		&self,
		request: &SearchRequest,
	) -> std::result::Result<QueryResponse, SourceFailure> {
		let body = serde_json::to_value(request)
			.map_err(|err| SourceFailure::Failed { message: err.to_string() })?;
		let raw = self.client.query(&body).await.map_err(|err| source_failure(err, request))?;

		serde_json::from_value(raw).map_err(|err| SourceFailure::Failed {
			message: format!("Malformed catalog response: {err}"),
		})
	}
}
impl CatalogTransport for HttpTransport {
	fn query<'a>(
		&'a self,
		request: &'a SearchRequest,
	) -> BoxFuture<'a, std::result::Result<QueryResponse, SourceFailure>> {
		Box::pin(self.send(request))
	}
}

/// Everything a query model needs from its surroundings.
#[derive(Clone)]
pub struct SearchContext {
	pub registry: Arc<SourceRegistry>,
	pub preferences: Arc<dyn Preferences>,
	pub transport: Arc<dyn CatalogTransport>,
	pub hook: Option<Arc<dyn PreQueryHook>>,
	pub timeout: Duration,
	pub spellcheck: bool,
	pub phonetics: bool,
}
impl SearchContext {
	pub fn new(
		registry: SourceRegistry,
		preferences: Arc<dyn Preferences>,
		transport: Arc<dyn CatalogTransport>,
	) -> Self {
		Self {
			registry: Arc::new(registry),
			preferences,
			transport,
			hook: None,
			timeout: Duration::from_secs(30),
			spellcheck: false,
			phonetics: false,
		}
	}

	pub fn from_config(cfg: &ddf_config::Config) -> Result<Self> {
		let registry = SourceRegistry::from_config(cfg)?;
		let client = CatalogClient::new(&cfg.catalog)?;
		let mut ctx = Self::new(
			registry,
			Arc::new(StaticPreferences { result_count: cfg.search.result_count }),
			Arc::new(HttpTransport::new(client)),
		);

		ctx.timeout = Duration::from_millis(cfg.catalog.timeout_ms);
		ctx.spellcheck = cfg.search.spellcheck;
		ctx.phonetics = cfg.search.phonetics;

		Ok(ctx)
	}

	pub fn with_hook(mut self, hook: Arc<dyn PreQueryHook>) -> Self {
		self.hook = Some(hook);

		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}
}

fn source_failure(err: ddf_providers::Error, request: &SearchRequest) -> SourceFailure {
	if err.is_timeout() {
		return SourceFailure::Timeout;
	}

	match err {
		ddf_providers::Error::Unauthorized { source_id, url } => SourceFailure::Unauthorized {
			source_id: source_id
				.or_else(|| request.sources.first().cloned())
				.unwrap_or_else(|| "unknown".to_string()),
			url,
		},
		other => SourceFailure::Failed { message: other.to_string() },
	}
}
