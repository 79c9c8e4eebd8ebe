//! Core types and shared utilities for the sightline EDR/intel bridge.
//!
//! This crate provides:
//! - The [`Event`] document type with slash-path lookups
//! - Indicator ([`Ioc`], [`IocType`]) and [`Sighting`] value types
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
mod ioc;
pub mod metrics;
mod sighting;

pub use error::{Error, Result};
pub use event::{
    Event, PATH_CHANNEL, PATH_ENDPOINT_HOSTNAME, PATH_ENDPOINT_UUID, PATH_EVENT_ID,
    PATH_TIMESTAMP,
};
pub use ioc::{Ioc, IocType};
pub use sighting::{Sighting, SightingFilters};

/// Default telemetry channel whose events feed the sighting extractor.
pub const SYSMON_CHANNEL: &str = "Microsoft-Windows-Sysmon/Operational";
