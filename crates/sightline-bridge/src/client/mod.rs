//! Collaborator contracts and HTTP clients.
//!
//! The bridge talks to two external systems:
//!
//! - The **EDR** ([`EdrClient`]): REST API plus the websocket event stream.
//!   It acts as the local indicator store ([`IndicatorStore`]).
//! - The **intel platform** ([`IntelClient`]): the remote indicator
//!   repository and sighting sink ([`IntelRepository`]).
//!
//! The traits exist so the reconciliation engine and the sighting handler
//! can be exercised against in-memory mocks.

mod edr;
mod intel;

pub use edr::{EdrClient, ROUTE_STREAM_DETECTIONS, ROUTE_STREAM_EVENTS};
pub use intel::IntelClient;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sightline_core::{Ioc, Sighting};

/// Filters for an index search against the intel repository.
///
/// Wire encoding is client-specific; each client builds its own body.
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    /// `Some(true)` restricts to published records; `None` includes all.
    pub published: Option<bool>,
    /// Restrict to records last updated at or after this watermark.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Reference to one intel record, as returned by an index search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordRef {
    pub uuid: String,
}

/// One attribute of an intel record.
///
/// `attr_type` is the platform's raw type string; classification against
/// the EDR allow-list happens in the reconciliation engine.
#[derive(Debug, Clone)]
pub struct IntelAttribute {
    pub uuid: String,
    pub value: String,
    pub attr_type: String,
    /// The platform's "actionable for detection" flag.
    pub to_ids: bool,
    pub timestamp: DateTime<Utc>,
}

/// An intel record with its full attribute set.
///
/// Attributes include both record-level attributes and those of grouped
/// sub-objects, flattened in platform order.
#[derive(Debug, Clone)]
pub struct IntelRecord {
    pub uuid: String,
    pub attributes: Vec<IntelAttribute>,
}

/// The remote indicator repository and sighting sink.
#[async_trait]
pub trait IntelRepository {
    /// Search the record index with the given filters.
    async fn search_index(&self, query: &IndexQuery) -> Result<Vec<RecordRef>>;

    /// Fetch a record's full attribute set.
    async fn get_record(&self, record: &RecordRef) -> Result<IntelRecord>;

    /// Report a sighting batch.
    async fn add_sighting(&self, sighting: &Sighting) -> Result<()>;
}

/// The local (EDR-side) indicator store.
///
/// `add` and `delete` are idempotent on the EDR side: adding an existing
/// indicator and deleting an absent one are both safe no-ops.
#[async_trait]
pub trait IndicatorStore {
    async fn list_iocs(&self) -> Result<Vec<Ioc>>;
    async fn add_iocs(&self, iocs: &[Ioc]) -> Result<()>;
    async fn delete_iocs(&self, uuids: &[String]) -> Result<()>;
}
