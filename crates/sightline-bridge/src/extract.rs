//! Indicator value extraction from event documents.
//!
//! A fixed, ordered table maps Sysmon/EDR field paths to an
//! [`ExtractionKind`] describing how the field's value is interpreted. One
//! dispatch function processes the whole table uniformly; there is no
//! per-field branching beyond the kind.
//!
//! Extraction only runs for events on the configured telemetry channel;
//! everything else yields an empty set. The output may contain duplicates
//! across paths — downstream dedup is the cache's job.

use sightline_core::Event;
use std::net::IpAddr;

const PATH_EVENT_DATA: &str = "/Event/EventData";

/// How a field value turns into indicator values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// Value appended as-is.
    Plain,
    /// Comma-separated `ALGO=hexvalue` list; each hex value emitted
    /// lowercase, whatever the algorithm.
    HashList,
    /// Hostname field where the literal `"-"` means "unknown" and is
    /// skipped.
    HostnameSentinel,
    /// Semicolon-separated list where only valid IPv4/IPv6 literals are
    /// kept; anything else is silently discarded.
    IpList,
}

/// The Sysmon and EDR fields mined for sightings, in table order.
pub const SIGHTING_FIELDS: &[(&str, ExtractionKind)] = &[
    ("/Event/EventData/Hashes", ExtractionKind::HashList),
    ("/Event/EventData/Image", ExtractionKind::Plain),
    ("/Event/EventData/SourceImage", ExtractionKind::Plain),
    ("/Event/EventData/ImageLoaded", ExtractionKind::Plain),
    ("/Event/EventData/ParentImage", ExtractionKind::Plain),
    ("/Event/EventData/OriginalFileName", ExtractionKind::Plain),
    ("/Event/EventData/TargetFilename", ExtractionKind::Plain),
    (
        "/Event/EventData/DestinationHostname",
        ExtractionKind::HostnameSentinel,
    ),
    ("/Event/EventData/DestinationIp", ExtractionKind::Plain),
    ("/Event/EventData/DestinationIpv6", ExtractionKind::Plain),
    (
        "/Event/EventData/SourceHostname",
        ExtractionKind::HostnameSentinel,
    ),
    ("/Event/EventData/SourceIp", ExtractionKind::Plain),
    ("/Event/EventData/SourceIpv6", ExtractionKind::Plain),
    ("/Event/EventData/TargetObject", ExtractionKind::Plain),
    ("/Event/EventData/PipeName", ExtractionKind::Plain),
    ("/Event/EventData/QueryName", ExtractionKind::Plain),
    ("/Event/EventData/QueryResults", ExtractionKind::IpList),
    ("/Event/EventData/ImageHashes", ExtractionKind::HashList),
    ("/Event/EventData/SourceHashes", ExtractionKind::HashList),
];

/// Extract candidate indicator values from one event.
///
/// Returns an empty vector unless the event's channel equals `channel`.
pub fn extract_sightings(event: &Event, channel: &str) -> Vec<String> {
    if event.channel() != Some(channel) {
        return Vec::new();
    }

    let mut out = Vec::new();
    for (path, kind) in SIGHTING_FIELDS {
        debug_assert!(path.starts_with(PATH_EVENT_DATA));
        let Some(value) = event.get(path) else {
            continue;
        };
        extract_field(value, *kind, &mut out);
    }
    out
}

/// Apply one extraction kind to one field value.
fn extract_field(value: &str, kind: ExtractionKind, out: &mut Vec<String>) {
    match kind {
        ExtractionKind::Plain => out.push(value.to_string()),
        ExtractionKind::HashList => {
            for (_algo, hash) in parse_hash_list(value) {
                out.push(hash);
            }
        }
        ExtractionKind::HostnameSentinel => {
            if value != "-" {
                out.push(value.to_string());
            }
        }
        ExtractionKind::IpList => {
            for segment in value.split(';') {
                if let Ok(ip) = segment.parse::<IpAddr>() {
                    out.push(ip.to_string());
                }
            }
        }
    }
}

/// Parse a Sysmon-style hash field (`"MD5=AAA,SHA256=BBB"`).
///
/// Yields `(algorithm, value)` pairs with both components lowercased.
/// Segments without `=` are skipped.
pub fn parse_hash_list(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split(',').filter_map(|segment| {
        let (algo, hash) = segment.split_once('=')?;
        Some((algo.to_lowercase(), hash.to_lowercase()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sightline_core::SYSMON_CHANNEL;

    fn event_with_data(data: serde_json::Value) -> Event {
        Event::from_value(json!({
            "Event": {
                "System": { "Channel": SYSMON_CHANNEL },
                "EventData": data
            }
        }))
    }

    #[test]
    fn test_hash_list_lowercased() {
        let event = event_with_data(json!({
            "Hashes": "MD5=AAA,SHA256=BBB"
        }));
        assert_eq!(extract_sightings(&event, SYSMON_CHANNEL), vec!["aaa", "bbb"]);
    }

    #[test]
    fn test_hash_list_skips_malformed_segments() {
        let pairs: Vec<_> = parse_hash_list("MD5=AAA,garbage,IMPHASH=CCC").collect();
        assert_eq!(
            pairs,
            vec![
                ("md5".to_string(), "aaa".to_string()),
                ("imphash".to_string(), "ccc".to_string())
            ]
        );
    }

    #[test]
    fn test_hostname_sentinel_skipped() {
        let event = event_with_data(json!({
            "DestinationHostname": "-",
            "SourceHostname": "dc01.corp.local"
        }));
        assert_eq!(
            extract_sightings(&event, SYSMON_CHANNEL),
            vec!["dc01.corp.local"]
        );
    }

    #[test]
    fn test_ip_list_keeps_only_parseable_addresses() {
        let event = event_with_data(json!({
            "QueryResults": "1.1.1.1;not-an-ip;::1"
        }));
        assert_eq!(extract_sightings(&event, SYSMON_CHANNEL), vec!["1.1.1.1", "::1"]);
    }

    #[test]
    fn test_plain_fields_in_table_order() {
        let event = event_with_data(json!({
            "Image": "C:\\evil.exe",
            "Hashes": "MD5=AAA",
            "QueryName": "evil.example.com"
        }));
        // Hashes precedes Image precedes QueryName in the table.
        assert_eq!(
            extract_sightings(&event, SYSMON_CHANNEL),
            vec!["aaa", "C:\\evil.exe", "evil.example.com"]
        );
    }

    #[test]
    fn test_other_channel_yields_nothing() {
        let event = Event::from_value(json!({
            "Event": {
                "System": { "Channel": "Security" },
                "EventData": { "Image": "C:\\evil.exe" }
            }
        }));
        assert!(extract_sightings(&event, SYSMON_CHANNEL).is_empty());
    }

    #[test]
    fn test_duplicates_across_paths_kept() {
        let event = event_with_data(json!({
            "Image": "C:\\evil.exe",
            "ParentImage": "C:\\evil.exe"
        }));
        assert_eq!(
            extract_sightings(&event, SYSMON_CHANNEL),
            vec!["C:\\evil.exe", "C:\\evil.exe"]
        );
    }
}
