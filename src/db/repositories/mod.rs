//! Backend implementations.
//!
//! `local` is an in-memory backend used for unit tests and development;
//! `postgres` is the production backend (feature `postgres-repo`).

pub mod local;

#[cfg(feature = "postgres-repo")]
pub mod postgres;

pub use local::{LocalBackend, LocalSiteConnector, PatientRecord};

#[cfg(feature = "postgres-repo")]
pub use postgres::{PostgresAdminRepository, PostgresSiteConnector, SitePoolConfig};
