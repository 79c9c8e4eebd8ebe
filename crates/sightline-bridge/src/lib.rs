//! Sightline bridge components.
//!
//! This crate bridges an endpoint-detection product and a threat-intel
//! platform in two directions:
//!
//! - **Live sightings**: the EDR event stream is ingested over a
//!   persistent websocket, indicator values are extracted per event,
//!   deduplicated against a cooldown cache, and reported to the intel
//!   platform as sightings.
//! - **IOC reconciliation**: intel records changed since a watermark are
//!   diffed into add/delete operations against the EDR indicator store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    bounded queue    ┌──────────────────┐
//! │ EventStream  │ ──────────────────▶ │  pipeline::drain │
//! │ (websocket,  │                     │  (extract →      │
//! │  reconnects) │                     │   dedupe →       │
//! └──────────────┘                     │   sighting POST) │
//!                                      └──────────────────┘
//!
//! ┌──────────────┐   index + records   ┌──────────────────┐
//! │ intel platform│ ◀────────────────▶ │ sync::reconcile  │ ──▶ EDR store
//! └──────────────┘                     └──────────────────┘
//! ```
//!
//! The stream side and the drain side are independent tasks joined only
//! by the queue; the reconciliation engine runs as its own synchronous,
//! non-overlapping cycle.

pub mod client;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod sightings;
pub mod stream;
pub mod sync;

pub use client::{
    EdrClient, IndexQuery, IndicatorStore, IntelAttribute, IntelClient, IntelRecord,
    IntelRepository, RecordRef,
};
pub use config::Config;
pub use dedupe::SightingCache;
pub use error::{Error, Result};
pub use extract::{extract_sightings, parse_hash_list, ExtractionKind, SIGHTING_FIELDS};
pub use pipeline::{drain, work_queue, DrainStats};
pub use sightings::SightingsUpdater;
pub use stream::{EventStream, StreamConfig, StreamState, StreamStats};
pub use sync::{reconcile, run_service, ReconcileOptions, ReconcileOutcome};
