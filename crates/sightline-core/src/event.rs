//! EDR event documents.
//!
//! Events arrive on the wire as arbitrarily nested JSON. Rather than
//! deserializing into a fixed schema, [`Event`] wraps the parsed document and
//! exposes slash-path lookups (`/Event/System/Channel`). A lookup on a
//! missing path or through a non-object node yields `None`, never an error.
//!
//! Events are immutable once constructed: they are created on stream message
//! receipt and discarded after extraction/handling.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Path to the Windows event channel.
pub const PATH_CHANNEL: &str = "/Event/System/Channel";
/// Path to the Windows event ID.
pub const PATH_EVENT_ID: &str = "/Event/System/EventID";
/// Path to the event creation timestamp (RFC 3339 with nanoseconds).
pub const PATH_TIMESTAMP: &str = "/Event/System/TimeCreated/SystemTime";
/// Path to the reporting endpoint's UUID.
pub const PATH_ENDPOINT_UUID: &str = "/Event/EdrData/Endpoint/UUID";
/// Path to the reporting endpoint's hostname.
pub const PATH_ENDPOINT_HOSTNAME: &str = "/Event/EdrData/Endpoint/Hostname";

/// One detection/telemetry record received from the EDR event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    data: Value,
}

impl Event {
    /// Parse an event from a raw JSON message.
    pub fn from_json(raw: &str) -> Result<Self> {
        let data = serde_json::from_str(raw)?;
        Ok(Self { data })
    }

    /// Wrap an already-parsed JSON document.
    pub fn from_value(data: Value) -> Self {
        Self { data }
    }

    /// Look up a node by slash-delimited path.
    ///
    /// Returns `None` if any segment is missing or an intermediate node is
    /// not an object.
    pub fn get_value(&self, path: &str) -> Option<&Value> {
        let mut node = &self.data;
        for segment in path.trim_start_matches('/').split('/') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    /// Look up a string value by slash-delimited path.
    ///
    /// Non-string leaves yield `None`, same as missing paths.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.get_value(path)?.as_str()
    }

    /// The event channel, if present.
    pub fn channel(&self) -> Option<&str> {
        self.get(PATH_CHANNEL)
    }

    /// The numeric Windows event ID, if present.
    pub fn event_id(&self) -> Option<i64> {
        self.get_value(PATH_EVENT_ID)?.as_i64()
    }

    /// The event creation time, parsed from its RFC 3339 representation.
    ///
    /// The EDR emits nanosecond precision; chrono accepts it directly.
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        let raw = self
            .get(PATH_TIMESTAMP)
            .ok_or_else(|| Error::Timestamp("missing".to_string()))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Timestamp(format!("{raw}: {e}")))
    }

    /// Source identity of the reporting endpoint, as `uuid|hostname`.
    ///
    /// Missing components render as empty strings rather than dropping the
    /// event; the pair still keys the dedup cache consistently.
    pub fn source_identity(&self) -> String {
        let uuid = self.get(PATH_ENDPOINT_UUID).unwrap_or_default();
        let hostname = self.get(PATH_ENDPOINT_HOSTNAME).unwrap_or_default();
        format!("{uuid}|{hostname}")
    }

    /// The underlying JSON document.
    pub fn data(&self) -> &Value {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sysmon_event() -> Event {
        Event::from_value(json!({
            "Event": {
                "System": {
                    "Channel": "Microsoft-Windows-Sysmon/Operational",
                    "EventID": 1,
                    "TimeCreated": {
                        "SystemTime": "2023-05-11T09:17:23.882964000Z"
                    }
                },
                "EventData": {
                    "Image": "C:\\Windows\\System32\\cmd.exe"
                },
                "EdrData": {
                    "Endpoint": {
                        "UUID": "5a92baeb-9384-47d3-92b4-a0db6f9b8c7d",
                        "Hostname": "WORKSTATION-01"
                    }
                }
            }
        }))
    }

    #[test]
    fn test_path_lookup() {
        let event = sysmon_event();
        assert_eq!(
            event.get("/Event/EventData/Image"),
            Some("C:\\Windows\\System32\\cmd.exe")
        );
        assert_eq!(event.channel(), Some("Microsoft-Windows-Sysmon/Operational"));
        assert_eq!(event.event_id(), Some(1));
    }

    #[test]
    fn test_missing_path_is_none() {
        let event = sysmon_event();
        assert_eq!(event.get("/Event/EventData/Nope"), None);
        assert_eq!(event.get("/Nope/At/All"), None);
        // Path descending through a leaf (wrong node type), not an error.
        assert_eq!(event.get("/Event/EventData/Image/Deeper"), None);
    }

    #[test]
    fn test_non_string_leaf_is_none_for_get() {
        let event = sysmon_event();
        assert_eq!(event.get(PATH_EVENT_ID), None);
        assert!(event.get_value(PATH_EVENT_ID).is_some());
    }

    #[test]
    fn test_timestamp_nanosecond_precision() {
        let event = sysmon_event();
        let ts = event.timestamp().unwrap();
        assert_eq!(ts.timestamp(), 1683796643);
    }

    #[test]
    fn test_source_identity() {
        let event = sysmon_event();
        assert_eq!(
            event.source_identity(),
            "5a92baeb-9384-47d3-92b4-a0db6f9b8c7d|WORKSTATION-01"
        );

        let bare = Event::from_value(json!({}));
        assert_eq!(bare.source_identity(), "|");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(Event::from_json("not json").is_err());
    }
}
