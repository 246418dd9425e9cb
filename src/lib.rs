//! # ART Analytics
//!
//! Multi-site clinical indicator computation for an HIV/ART program.
//!
//! A national program runs many clinical sites, each with its own
//! database of patient records. This crate computes program indicators
//! (treatment cohort sizes, retention, viral load coverage and the like)
//! per site and reporting period, caches the results centrally, and
//! re-runs the computation on a calendar schedule.
//!
//! ## Architecture
//!
//! - [`api`]: Data Transfer Objects handed to callers
//! - [`db`]: Site registry, result cache, per-site connection routing
//! - [`indicators`]: Indicator definitions, catalog and cohort queries
//! - [`engine`]: Computation engine tying connector, catalog and cache
//! - [`scheduler`]: Calendar-driven batch runs and maintenance loops
//! - [`periods`]: Reporting period derivation (quarters and months)
//!
//! ## Backends
//!
//! Storage is behind repository traits with two implementations: an
//! in-memory backend (feature `local-repo`, default) for tests and
//! development, and Postgres via Diesel (feature `postgres-repo`) for
//! production. The administrative database holds site metadata, cached
//! results and indicator flags; each site's clinical data is reached
//! through a lazily-created, per-site connection pool.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use art_analytics::db::BackendFactory;
//! use art_analytics::engine::IndicatorEngine;
//! use art_analytics::indicators::{IndicatorCatalog, IndicatorParams};
//! use art_analytics::periods::ReportingPeriod;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     art_analytics::telemetry::init()?;
//!     let backend = BackendFactory::from_env().await?;
//!     let catalog = Arc::new(IndicatorCatalog::builtin().with_flag_store(backend.flags.clone()));
//!     catalog.sync_flags().await?;
//!
//!     let engine = IndicatorEngine::new(backend.connector, catalog, IndicatorParams::default())
//!         .with_cache(backend.cache);
//!     let period = ReportingPeriod::quarterly(2025, 2)?;
//!     let result = engine.compute_one("KIG001", "tx_curr", &period).await?;
//!     println!("{}: {}", result.indicator_id, result.total);
//!     Ok(())
//! }
//! ```

// Allow large error types - AnalyticsError carries rich context for debugging
#![allow(clippy::result_large_err)]

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod periods;
pub mod scheduler;
pub mod telemetry;

pub use api::{IndicatorReport, IndicatorResult, IndicatorSelection, SiteComputation};
pub use engine::IndicatorEngine;
pub use error::{AnalyticsError, AnalyticsResult};
pub use periods::{PeriodType, ReportingPeriod};
