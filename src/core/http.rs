//! JSON-over-HTTP client for the remote memory service.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::error::{Result, SessionError};
use super::grid::Grid;
use super::store::MemoryBackend;

#[derive(Serialize)]
struct GridRequest<'a> {
    grid: &'a Grid,
}

#[derive(Deserialize)]
struct MessageReply {
    #[serde(default)]
    message: String,
}

// Grids are decoded loosely and validated afterwards so a malformed reply
// surfaces as a validation error rather than a transport one.
#[derive(Deserialize)]
struct RecallReply {
    grid: Vec<Vec<i64>>,
    energy: f64,
}

#[derive(Deserialize)]
struct RecallAllReply {
    grids: Vec<Vec<Vec<i64>>>,
}

#[derive(Deserialize)]
struct CountReply {
    patterns: usize,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::network("client", e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(&self, call: &'static str, req: RequestBuilder) -> Result<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| SessionError::network(call, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorReply>(&body)
                .map(|r| r.error)
                .unwrap_or(body);
            return Err(SessionError::network(call, format!("HTTP {status}: {detail}")));
        }

        debug!(call, %status, "remote call succeeded");
        resp.json::<T>()
            .await
            .map_err(|e| SessionError::network(call, format!("bad response body: {e}")))
    }
}

impl MemoryBackend for HttpBackend {
    async fn memorize(&self, grid: &Grid) -> Result<String> {
        let req = self
            .client
            .post(self.url("/api/memorize"))
            .json(&GridRequest { grid });
        let reply: MessageReply = self.call("memorize", req).await?;
        Ok(reply.message)
    }

    async fn recall(&self, probe: &Grid) -> Result<(Grid, f64)> {
        let req = self
            .client
            .post(self.url("/api/recall"))
            .json(&GridRequest { grid: probe });
        let reply: RecallReply = self.call("recall", req).await?;
        let grid = Grid::from_rows(&reply.grid)?;
        Ok((grid, reply.energy))
    }

    async fn recall_all(&self) -> Result<Vec<Grid>> {
        let req = self.client.post(self.url("/api/recallAll")).json(&json!({}));
        let reply: RecallAllReply = self.call("recall_all", req).await?;
        let grids = reply
            .grids
            .iter()
            .map(|rows| Grid::from_rows(rows))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(grids)
    }

    async fn clear(&self) -> Result<String> {
        let req = self.client.post(self.url("/api/clear")).json(&json!({}));
        let reply: MessageReply = self.call("clear", req).await?;
        Ok(reply.message)
    }

    async fn pattern_count(&self) -> Result<usize> {
        let req = self.client.get(self.url("/api/get-patterns"));
        let reply: CountReply = self.call("pattern_count", req).await?;
        Ok(reply.patterns)
    }
}
