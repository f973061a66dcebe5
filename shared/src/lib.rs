//! Timbertrace Shared Library
//!
//! This crate contains the telemetry pipeline of the Timbertrace ERP:
//! models, configuration, storage traits with in-memory stores, and the
//! components that ingest, correlate, aggregate, group, audit and alert.
//!
//! # Modules
//!
//! - [`telemetry`] - Producer facade wiring every component together
//! - [`ingest`] - Event ingestion and trace correlation
//! - [`aggregation`] - Metric rollups and threshold annotation
//! - [`grouping`] - Error fingerprinting and grouping
//! - [`audit`] - Tamper-evident audit chains
//! - [`sessions`] - Session and health tracking
//! - [`alerting`] - Alert evaluation and notification
//! - [`models`] - Data models
//! - [`storage`] - Storage traits and implementations
//! - [`config`] - Pipeline configuration
//!
//! # Example
//!
//! ```
//! use shared::config::TelemetryConfig;
//! use shared::context::TelemetryContext;
//! use shared::models::{Event, EventCategory, MetricSample};
//! use shared::telemetry::{Emission, Telemetry};
//!
//! let (telemetry, _notifications) = Telemetry::in_memory(TelemetryConfig::default()).unwrap();
//! let ctx = TelemetryContext::new("production").with_tenant("zimmerei-nord");
//!
//! telemetry
//!     .emit(&ctx, Emission::Event(Event::new("invoice_created", EventCategory::Business)))
//!     .unwrap();
//! telemetry
//!     .emit(&ctx, Emission::Metric(MetricSample::timer("invoice_export_ms", 412.0)))
//!     .unwrap();
//!
//! assert_eq!(telemetry.ingestor().events().count().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregation;
pub mod alerting;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod grouping;
pub mod ingest;
pub mod models;
pub mod sessions;
pub mod storage;
pub mod telemetry;

pub use error::{ErrorKind, TelemetryError};

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
