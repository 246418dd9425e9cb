//! Site registry.
//!
//! Metadata for every clinical site lives in a single administrative
//! database; each site's clinical data lives in its own database, routed
//! by `database_name`. The registry is consumed read-mostly by the
//! connection manager on every resolution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AnalyticsResult;

/// Whether a site participates in scheduled batches and on-demand reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Inactive,
}

impl SiteStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SiteStatus::Active)
    }
}

/// One clinical site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Unique, stable identifier (cache keys and routing use it).
    pub code: String,
    pub display_name: String,
    /// Name of this site's database on the site database server.
    pub database_name: String,
    pub status: SiteStatus,
}

/// Repository trait for site metadata.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// Fetch one site by code.
    ///
    /// # Returns
    /// * `Ok(Some(Site))` when the code exists (active or not)
    /// * `Ok(None)` when it does not
    async fn get_site(&self, code: &str) -> AnalyticsResult<Option<Site>>;

    /// All sites, active and inactive.
    async fn list_sites(&self) -> AnalyticsResult<Vec<Site>>;

    /// Sites eligible for scheduled batches and on-demand resolution.
    async fn list_active_sites(&self) -> AnalyticsResult<Vec<Site>>;

    /// Activate or deactivate a site (administrative surface).
    async fn set_site_status(&self, code: &str, status: SiteStatus) -> AnalyticsResult<()>;
}
