//! In-process stand-in for the catalog query endpoint.

mod error;

pub use error::{Error, Result};

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde_json::Value;
use tokio::{net::TcpListener, task::JoinHandle, time};

pub const QUERY_PATH: &str = "/search/catalog/internal/cql";

#[derive(Clone, Debug)]
pub struct MockReply {
	pub status: u16,
	pub body: Value,
	pub delay: Duration,
}
impl MockReply {
	pub fn ok(body: Value) -> Self {
		Self { status: 200, body, delay: Duration::ZERO }
	}

	pub fn status(status: u16, body: Value) -> Self {
		Self { status, body, delay: Duration::ZERO }
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;

		self
	}
}

#[derive(Default)]
struct MockState {
	replies: Mutex<HashMap<String, MockReply>>,
	received: Mutex<Vec<Value>>,
}

/// Serves [`QUERY_PATH`] on an ephemeral port. Replies are keyed by the first id in the
/// request's `sources` array; unknown sources get an empty successful page.
pub struct MockCatalog {
	base_url: String,
	state: Arc<MockState>,
	server: JoinHandle<()>,
}
impl MockCatalog {
	pub async fn spawn() -> Result<Self> {
		let listener = TcpListener::bind("127.0.0.1:0").await?;
		let addr = listener.local_addr()?;
		let state = Arc::new(MockState::default());
		let router = Router::new().route(QUERY_PATH, post(handle_query)).with_state(state.clone());
		let server = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router).await {
				eprintln!("Mock catalog stopped: {err}.");
			}
		});

		Ok(Self { base_url: format!("http://{addr}"), state, server })
	}

	pub fn base_url(&self) -> String {
		self.base_url.clone()
	}

	pub fn reply(&self, source_id: &str, reply: MockReply) {
		let mut replies = self.state.replies.lock().unwrap_or_else(|err| err.into_inner());

		replies.insert(source_id.to_string(), reply);
	}

	/// Request bodies in arrival order.
	pub fn received(&self) -> Vec<Value> {
		self.state.received.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl Drop for MockCatalog {
	fn drop(&mut self) {
		self.server.abort();
	}
}

/// Builds a catalog response page with one status entry.
pub fn page(source_id: &str, hits: u64, ids: &[&str]) -> Value {
	let results: Vec<Value> = ids
		.iter()
		.map(|id| {
			serde_json::json!({
				"metacard": {
					"properties": { "id": id, "title": format!("Record {id}"), "source-id": source_id }
				}
			})
		})
		.collect();

	serde_json::json!({
		"results": results,
		"status": {
			"id": source_id,
			"hits": hits,
			"count": ids.len(),
			"elapsed": 5,
			"successful": true
		}
	})
}

async fn handle_query(
	State(state): State<Arc<MockState>>,
	Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
	let source_id = body
		.get("sources")
		.and_then(Value::as_array)
		.and_then(|sources| sources.first())
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();

	state.received.lock().unwrap_or_else(|err| err.into_inner()).push(body);

	let reply = state
		.replies
		.lock()
		.unwrap_or_else(|err| err.into_inner())
		.get(&source_id)
		.cloned()
		.unwrap_or_else(|| MockReply::ok(page(&source_id, 0, &[])));

	if !reply.delay.is_zero() {
		time::sleep(reply.delay).await;
	}

	let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

	(status, Json(reply.body))
}
