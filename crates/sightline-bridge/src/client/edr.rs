//! EDR REST API client.
//!
//! Every REST response is wrapped in an `{"error": "", "data": ...}`
//! envelope. A 200 with a non-empty `error` is an application-level fault
//! ([`Error::Api`]); any other status is [`Error::UnexpectedStatus`]. Both
//! are distinct from transport errors, which surface as [`Error::Http`].

use super::IndicatorStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use sightline_core::Ioc;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-Api-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Route of the live event stream (websocket).
pub const ROUTE_STREAM_EVENTS: &str = "/stream/events";
/// Route of the live detection stream (websocket).
pub const ROUTE_STREAM_DETECTIONS: &str = "/stream/detections";

/// Client for the EDR manager's REST API.
#[derive(Debug, Clone)]
pub struct EdrClient {
    http: reqwest::Client,
    url: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    error: String,
    data: Value,
}

impl EdrClient {
    /// Build a client for the given base URL and API key.
    ///
    /// `verify = false` accepts self-signed certificates.
    pub fn new(url: &str, key: &str, verify: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(key).map_err(|e| Error::Config(format!("API key: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!verify)
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    /// Full URL for an API route.
    pub fn api_route(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    /// Websocket URL for a stream route (`http` scheme swapped for `ws`).
    pub fn ws_route(&self, path: &str) -> String {
        self.api_route(path).replacen("http", "ws", 1)
    }

    /// The API key, for the websocket upgrade header.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Liveness probe: any HTTP answer from the API root means the service
    /// is up, except an auth rejection. A refused key is fatal
    /// misconfiguration and must abort startup, not spin the reconnect
    /// loop forever.
    pub async fn probe(&self) -> Result<()> {
        let resp = self.http.get(self.api_route("")).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::UnexpectedStatus(status));
        }
        Ok(())
    }

    /// Send a request and unwrap the EDR response envelope.
    async fn request(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = req.send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(Error::UnexpectedStatus(resp.status()));
        }
        let envelope: Envelope = resp.json().await?;
        if !envelope.error.is_empty() {
            return Err(Error::Api(envelope.error));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl IndicatorStore for EdrClient {
    async fn list_iocs(&self) -> Result<Vec<Ioc>> {
        let data = self.request(self.http.get(self.api_route("/iocs"))).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn add_iocs(&self, iocs: &[Ioc]) -> Result<()> {
        if iocs.is_empty() {
            return Ok(());
        }
        self.request(self.http.post(self.api_route("/iocs")).json(iocs))
            .await?;
        Ok(())
    }

    async fn delete_iocs(&self, uuids: &[String]) -> Result<()> {
        for uuid in uuids {
            self.request(
                self.http
                    .delete(self.api_route("/iocs"))
                    .query(&[("uuid", uuid)]),
            )
            .await?;
        }
        Ok(())
    }
}
