//! Intel platform HTTP client.
//!
//! Speaks the MISP-style REST surface: index search, record view with
//! record-level and grouped sub-object attributes, and sighting reports.
//! Authentication is a static key in the `Authorization` header.

use super::{IndexQuery, IntelAttribute, IntelRecord, IntelRepository, RecordRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sightline_core::Sighting;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the threat-intel platform.
#[derive(Debug, Clone)]
pub struct IntelClient {
    http: reqwest::Client,
    url: String,
}

// Wire shapes of the platform's record view. Timestamps come as
// epoch-second strings.
#[derive(Debug, Deserialize)]
struct RecordView {
    #[serde(rename = "Event")]
    event: RecordBody,
}

#[derive(Debug, Deserialize)]
struct RecordBody {
    uuid: String,
    #[serde(rename = "Attribute", default)]
    attributes: Vec<AttributeBody>,
    #[serde(rename = "Object", default)]
    objects: Vec<ObjectBody>,
}

#[derive(Debug, Deserialize)]
struct ObjectBody {
    #[serde(rename = "Attribute", default)]
    attributes: Vec<AttributeBody>,
}

#[derive(Debug, Deserialize)]
struct AttributeBody {
    uuid: String,
    value: String,
    #[serde(rename = "type")]
    attr_type: String,
    #[serde(default)]
    to_ids: bool,
    timestamp: String,
}

impl AttributeBody {
    fn into_attribute(self) -> Result<IntelAttribute> {
        let epoch: i64 = self
            .timestamp
            .parse()
            .map_err(|_| Error::Api(format!("bad attribute timestamp: {}", self.timestamp)))?;
        let timestamp = DateTime::<Utc>::from_timestamp(epoch, 0)
            .ok_or_else(|| Error::Api(format!("bad attribute timestamp: {epoch}")))?;
        Ok(IntelAttribute {
            uuid: self.uuid,
            value: self.value,
            attr_type: self.attr_type,
            to_ids: self.to_ids,
            timestamp,
        })
    }
}

impl IntelClient {
    /// Build a client for the given base URL and API key.
    pub fn new(url: &str, key: &str, verify: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(key).map_err(|e| Error::Config(format!("API key: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!verify)
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    fn route(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    /// Liveness/credential probe: the index endpoint must answer
    /// successfully for the configured key.
    pub async fn probe(&self) -> Result<()> {
        let resp = self
            .http
            .post(self.route("/events/index"))
            .json(&serde_json::json!({ "limit": 1 }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::UnexpectedStatus(resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl IntelRepository for IntelClient {
    async fn search_index(&self, query: &IndexQuery) -> Result<Vec<RecordRef>> {
        let mut body = serde_json::Map::new();
        if let Some(published) = query.published {
            body.insert("published".into(), serde_json::json!(published as u8));
        }
        if let Some(ts) = query.timestamp {
            body.insert("timestamp".into(), serde_json::json!(ts.timestamp()));
        }

        let resp = self
            .http
            .post(self.route("/events/index"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::UnexpectedStatus(resp.status()));
        }
        Ok(resp.json().await?)
    }

    async fn get_record(&self, record: &RecordRef) -> Result<IntelRecord> {
        let resp = self
            .http
            .get(self.route(&format!("/events/view/{}", record.uuid)))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::UnexpectedStatus(resp.status()));
        }
        let view: RecordView = resp.json().await?;

        // Record-level attributes first, then each grouped object's, in
        // platform order.
        let mut attributes = Vec::new();
        for attr in view.event.attributes {
            attributes.push(attr.into_attribute()?);
        }
        for object in view.event.objects {
            for attr in object.attributes {
                attributes.push(attr.into_attribute()?);
            }
        }

        Ok(IntelRecord {
            uuid: view.event.uuid,
            attributes,
        })
    }

    async fn add_sighting(&self, sighting: &Sighting) -> Result<()> {
        let resp = self
            .http
            .post(self.route("/sightings/add"))
            .json(sighting)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::UnexpectedStatus(resp.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_view_flattening() {
        let raw = r#"{
            "Event": {
                "uuid": "rec-1",
                "Attribute": [
                    {"uuid": "a1", "value": "aaa", "type": "md5", "to_ids": true, "timestamp": "1700000000"}
                ],
                "Object": [
                    {"Attribute": [
                        {"uuid": "a2", "value": "evil.example.com", "type": "domain", "timestamp": "1700000100"}
                    ]}
                ]
            }
        }"#;
        let view: RecordView = serde_json::from_str(raw).unwrap();
        assert_eq!(view.event.uuid, "rec-1");

        let attrs: Vec<_> = view
            .event
            .attributes
            .into_iter()
            .chain(view.event.objects.into_iter().flat_map(|o| o.attributes))
            .map(|a| a.into_attribute().unwrap())
            .collect();
        assert_eq!(attrs.len(), 2);
        assert!(attrs[0].to_ids);
        assert!(!attrs[1].to_ids); // defaulted
        assert_eq!(attrs[1].timestamp.timestamp(), 1700000100);
    }

    #[test]
    fn test_bad_timestamp_is_api_error() {
        let attr = AttributeBody {
            uuid: "a1".into(),
            value: "aaa".into(),
            attr_type: "md5".into(),
            to_ids: true,
            timestamp: "not-an-epoch".into(),
        };
        assert!(matches!(attr.into_attribute(), Err(Error::Api(_))));
    }
}
