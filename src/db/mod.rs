//! Storage layer: site registry, result cache, per-site connections.
//!
//! The administrative database holds site metadata, cached indicator
//! results and indicator flags; each clinical site has its own database
//! reached through [`SiteConnector`]. Two backends implement the traits:
//! an in-memory one (default, feature `local-repo`) and Postgres
//! (feature `postgres-repo`).

pub mod cache;
pub mod connector;
pub mod factory;
pub mod registry;
pub mod repositories;

pub use cache::{CacheEntry, CacheKey, CacheRepository};
pub use connector::{SiteConnector, SiteRepository};
pub use factory::{Backend, BackendFactory, BackendType};
pub use registry::{Site, SiteRegistry, SiteStatus};

#[cfg(not(any(feature = "local-repo", feature = "postgres-repo")))]
compile_error!("At least one backend feature must be enabled: 'local-repo' or 'postgres-repo'");
