use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::error::SyncError;

/// One page of a paginated PanelApp listing response.
#[derive(Debug, Clone)]
pub struct PageEnvelope {
    pub count: u64,
    pub next: Option<String>,
    pub results: Vec<Value>,
    /// The response body as received, persisted verbatim by the stages.
    pub raw: Value,
}

impl PageEnvelope {
    pub fn from_value(raw: Value) -> Self {
        let count = raw.get("count").and_then(Value::as_u64).unwrap_or(0);
        let next = raw
            .get("next")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|url| !url.is_empty() && url != "null");
        let results = raw
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Self {
            count,
            next,
            results,
            raw,
        }
    }
}

pub trait PanelAppClient: Send + Sync {
    fn fetch_page(&self, url: &str) -> Result<PageEnvelope, SyncError>;
    /// Reported API version from the swagger document, if resolvable.
    fn fetch_api_version(&self) -> Result<Option<String>, SyncError>;
}

#[derive(Clone)]
pub struct PanelAppHttpClient {
    client: Client,
    swagger_url: String,
}

impl PanelAppHttpClient {
    pub fn new(config: &Config) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("panel-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::ApiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| SyncError::ApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            swagger_url: config.swagger_url(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::ApiHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "PanelApp request failed".to_string());
        Err(SyncError::ApiStatus { status, message })
    }
}

impl PanelAppClient for PanelAppHttpClient {
    fn fetch_page(&self, url: &str) -> Result<PageEnvelope, SyncError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| SyncError::ApiJson(err.to_string()))?;
        Ok(PageEnvelope::from_value(raw))
    }

    fn fetch_api_version(&self) -> Result<Option<String>, SyncError> {
        let response = self.send_with_retries(|| self.client.get(&self.swagger_url))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| SyncError::ApiJson(err.to_string()))?;
        Ok(raw
            .get("info")
            .and_then(|info| info.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Outcome of draining one paginated endpoint.
#[derive(Debug, Clone, Copy)]
pub struct DrainSummary {
    pub pages: u32,
    pub records: u64,
    /// True when the page ceiling stopped the drain before `next` ran out.
    pub truncated: bool,
}

/// Follows `next` links from `first_url` until exhausted, handing each page
/// to `sink` with its 1-based page number. A `sink` or request error aborts
/// the drain. Hitting `page_limit` stops with a warning instead of failing.
pub fn drain_pages<C, F>(
    client: &C,
    first_url: &str,
    page_limit: u32,
    mut sink: F,
) -> Result<DrainSummary, SyncError>
where
    C: PanelAppClient + ?Sized,
    F: FnMut(u32, &PageEnvelope) -> Result<(), SyncError>,
{
    let mut next_url = Some(first_url.to_string());
    let mut page = 0u32;
    let mut records = 0u64;

    while let Some(url) = next_url {
        if page >= page_limit {
            warn!(
                limit = page_limit,
                url, "page ceiling reached, stopping pagination"
            );
            return Ok(DrainSummary {
                pages: page,
                records,
                truncated: true,
            });
        }
        page += 1;
        let envelope = client.fetch_page(&url)?;
        records += envelope.results.len() as u64;
        sink(page, &envelope)?;
        next_url = envelope.next;
    }

    Ok(DrainSummary {
        pages: page,
        records,
        truncated: false,
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
