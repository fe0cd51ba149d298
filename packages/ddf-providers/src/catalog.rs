use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Body the catalog sends with a 401 so the caller can point the user at the source's login.
#[derive(Debug, Default, Deserialize)]
struct UnauthorizedBody {
	url: Option<String>,
	id: Option<String>,
}

/// HTTP client bound to one catalog query endpoint.
#[derive(Clone, Debug)]
pub struct CatalogClient {
	client: Client,
	url: String,
}
impl CatalogClient {
	pub fn new(cfg: &ddf_config::Catalog) -> Result<Self> {
		let client = Client::builder()
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.default_headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
			.build()?;

		Ok(Self { client, url: format!("{}{}", cfg.api_base, cfg.query_path) })
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// POSTs one search payload and returns the raw JSON response.
	pub async fn query(&self, body: &Value) -> Result<Value> {
		let res = self.client.post(&self.url).json(body).send().await?;
		let status = res.status();

		if status == StatusCode::UNAUTHORIZED {
			let body = res.json::<UnauthorizedBody>().await.unwrap_or_default();

			return Err(Error::Unauthorized { source_id: body.id, url: body.url });
		}
		if !status.is_success() {
			return Err(Error::Status { status: status.as_u16() });
		}

		Ok(res.json().await?)
	}
}
