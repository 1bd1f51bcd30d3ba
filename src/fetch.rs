//! HTTP fetch seam for the feed and the heartbeat monitor.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Request, Response};
use std::time::Duration;

/// Minimal client abstraction so the capture pipeline can be exercised
/// without a network.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// [`HttpClient`] over a plain `reqwest::Client` with a request timeout,
/// so a hung feed endpoint can't stall a capture tick forever.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(BasicClient(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// GETs `url` and returns the response body.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = Request::new(reqwest::Method::GET, url.parse()?);
    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
