//! Site connection management.
//!
//! [`SiteConnector`] turns a site code into a live [`SiteRepository`]
//! backed by that site's own database, creating the underlying pool on
//! first use and caching it for the process lifetime. Routing is a typed
//! lookup through the site registry; there is no string-built connection
//! switching and no automatic retry; retry policy belongs to callers.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::api::{DemographicBreakdown, PageRequest, PatientPage};
use crate::db::registry::Site;
use crate::error::AnalyticsResult;
use crate::indicators::query::CohortQuery;

/// Read-only access to one site's clinical data.
///
/// Implementations translate [`CohortQuery`] themselves: Diesel
/// expressions for Postgres, in-memory predicates for the local backend.
#[async_trait]
pub trait SiteRepository: Send + Sync {
    /// Count the cohort, broken down into the four sex/age-band buckets.
    async fn count_cohort(&self, query: &CohortQuery) -> AnalyticsResult<DemographicBreakdown>;

    /// Patient-level rows behind the cohort, paginated, for drill-down.
    async fn fetch_cohort_page(
        &self,
        query: &CohortQuery,
        page: &PageRequest,
    ) -> AnalyticsResult<PatientPage>;
}

/// Routes site codes to live per-site repositories.
#[async_trait]
pub trait SiteConnector: Send + Sync {
    /// Resolve a site code to its repository, creating the pool lazily.
    ///
    /// # Returns
    /// * `Err(SiteNotFound)` - unknown code or deactivated site
    /// * `Err(ConnectionError)` - the pool could not be created
    async fn resolve(&self, site_code: &str) -> AnalyticsResult<Arc<dyn SiteRepository>>;

    /// Sites eligible for resolution and scheduled batches.
    async fn list_active_sites(&self) -> AnalyticsResult<Vec<Site>>;

    /// Close and discard a site's pool, e.g. after its database was
    /// recreated. The next resolve builds a fresh pool.
    async fn invalidate(&self, site_code: &str);
}

/// Lazily-initialized map of per-site handles.
///
/// First access for a cold key runs the init future exactly once even
/// under concurrent resolution: callers for the same key serialize on a
/// per-key mutex while distinct keys initialize in parallel. Invariant:
/// at most one live handle per key at any time.
pub(crate) struct SitePoolMap<R> {
    entries: RwLock<HashMap<String, Arc<R>>>,
    init_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R> SitePoolMap<R> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            init_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Existing handle for the key, if initialized.
    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        self.entries.read().get(key).cloned()
    }

    /// Return the handle for `key`, running `init` to build it on first
    /// access. A failed init leaves the map empty for the key so the next
    /// caller retries.
    pub async fn get_or_init<F, Fut>(&self, key: &str, init: F) -> AnalyticsResult<Arc<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalyticsResult<R>>,
    {
        if let Some(existing) = self.entries.read().get(key) {
            return Ok(existing.clone());
        }

        let key_lock = {
            let mut locks = self.init_locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // Double-check: another caller may have finished init while we
        // waited on the per-key lock.
        if let Some(existing) = self.entries.read().get(key) {
            return Ok(existing.clone());
        }

        let handle = Arc::new(init().await?);
        self.entries
            .write()
            .insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    /// Drop the handle for `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<Arc<R>> {
        self.entries.write().remove(key)
    }
}
