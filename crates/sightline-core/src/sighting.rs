//! Sighting payloads reported to the intel platform.

use serde::{Deserialize, Serialize};

/// A batch observation of indicator values seen at one source.
///
/// Ephemeral: constructed, POSTed to the intel platform, discarded.
/// The wire shape is `{"values": [...], "filters": {"to_ids": 1}, "source": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub values: Vec<String>,
    pub filters: SightingFilters,
    pub source: String,
}

/// Filter flags attached to a sighting report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingFilters {
    pub to_ids: u8,
}

impl Sighting {
    /// Build a sighting for values observed at `source`, restricted to
    /// detection-grade (`to_ids`) attributes on the platform side.
    pub fn new(source: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            values,
            filters: SightingFilters { to_ids: 1 },
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let s = Sighting::new("uuid|host", vec!["aaa".to_string(), "1.1.1.1".to_string()]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["filters"]["to_ids"], 1);
        assert_eq!(json["source"], "uuid|host");
        assert_eq!(json["values"].as_array().unwrap().len(), 2);
    }
}
