//! Postgres backend using Diesel.
//!
//! [`PostgresAdminRepository`] serves the administrative database (site
//! registry, result cache, indicator flags) with connection pooling,
//! automatic retry for transient failures and embedded migrations.
//! [`PostgresSiteConnector`] routes site codes to per-site read-only
//! pools; see the `sites` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::upsert::excluded;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use crate::api::IndicatorResult;
use crate::config::AdminDbSettings;
use crate::db::cache::{CacheEntry, CacheKey, CacheRepository};
use crate::db::registry::{Site, SiteRegistry, SiteStatus};
use crate::error::{AnalyticsError, AnalyticsResult, ErrorContext};
use crate::indicators::catalog::IndicatorFlagStore;
use crate::periods::{PeriodType, ReportingPeriod};

mod models;
mod schema;
mod site_schema;
mod sites;

use models::*;
use schema::{indicator_cache, indicator_flags, sites as sites_table};

pub use sites::{PostgresSiteConnector, SitePoolConfig};

pub(crate) type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Pool health statistics for the administrative database.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub connections_in_use: u32,
    pub idle_connections: u32,
    pub total_connections: u32,
    pub max_size: u32,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub retried_operations: u64,
}

/// Diesel-backed repository for the administrative database.
#[derive(Clone)]
pub struct PostgresAdminRepository {
    pool: PgPool,
    settings: AdminDbSettings,
    // Metrics counters
    total_queries: Arc<AtomicU64>,
    failed_queries: Arc<AtomicU64>,
    retried_operations: Arc<AtomicU64>,
}

impl PostgresAdminRepository {
    /// Create a new repository with a connection pool.
    ///
    /// # Arguments
    /// * `settings` - Administrative database settings
    ///
    /// # Returns
    /// * `Ok(PostgresAdminRepository)` on success
    /// * `Err(ConnectionError)` if the pool cannot be created
    pub fn new(settings: AdminDbSettings) -> AnalyticsResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&settings.database_url);

        let pool = Pool::builder()
            .max_size(settings.max_connections)
            .min_idle(Some(settings.min_connections))
            .connection_timeout(Duration::from_secs(settings.connect_timeout))
            .idle_timeout(Some(Duration::from_secs(settings.idle_timeout)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                AnalyticsError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_admin_pool")
                        .with_details(format!("max_size={}", settings.max_connections)),
                )
            })?;

        Ok(Self {
            pool,
            settings,
            total_queries: Arc::new(AtomicU64::new(0)),
            failed_queries: Arc::new(AtomicU64::new(0)),
            retried_operations: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Run pending administrative schema migrations.
    pub async fn run_migrations(&self) -> AnalyticsResult<()> {
        self.with_conn(|conn| {
            conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
                AnalyticsError::internal(format!("Migration failed: {}", e))
                    .with_operation("run_migrations")
            })?;
            Ok(())
        })
        .await
    }

    /// Execute a database operation with automatic retry for transient
    /// failures (connection errors, serialization failures).
    async fn with_conn<T, F>(&self, f: F) -> AnalyticsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> AnalyticsResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.settings.max_retries;
        let retry_delay_ms = self.settings.retry_delay_ms;
        let total_queries = self.total_queries.clone();
        let failed_queries = self.failed_queries.clone();
        let retried_operations = self.retried_operations.clone();

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    retried_operations.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2; // Exponential backoff
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = AnalyticsError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                };

                total_queries.fetch_add(1, Ordering::Relaxed);
                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            failed_queries.fetch_add(1, Ordering::Relaxed);
            Err(last_error.unwrap_or_else(|| {
                AnalyticsError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            AnalyticsError::internal(format!("Task join error: {}", e))
                .with_operation("spawn_blocking")
        })?
    }

    /// Current pool state and query statistics for monitoring.
    pub fn get_pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections_in_use: state.connections - state.idle_connections,
            idle_connections: state.idle_connections,
            total_connections: state.connections,
            max_size: self.settings.max_connections,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            retried_operations: self.retried_operations.load(Ordering::Relaxed),
        }
    }

    /// Verify connectivity with a trivial query.
    pub async fn is_healthy(&self) -> bool {
        self.with_conn(|conn| {
            diesel::sql_query("SELECT 1")
                .execute(conn)
                .map_err(AnalyticsError::from)?;
            Ok(())
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl SiteRegistry for PostgresAdminRepository {
    async fn get_site(&self, code: &str) -> AnalyticsResult<Option<Site>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let row = sites_table::table
                .find(&code)
                .select(SiteRow::as_select())
                .first::<SiteRow>(conn)
                .optional()?;
            Ok(row.map(Site::from))
        })
        .await
    }

    async fn list_sites(&self) -> AnalyticsResult<Vec<Site>> {
        self.with_conn(|conn| {
            let rows = sites_table::table
                .order(sites_table::code.asc())
                .select(SiteRow::as_select())
                .load::<SiteRow>(conn)?;
            Ok(rows.into_iter().map(Site::from).collect())
        })
        .await
    }

    async fn list_active_sites(&self) -> AnalyticsResult<Vec<Site>> {
        self.with_conn(|conn| {
            let rows = sites_table::table
                .filter(sites_table::is_active.eq(true))
                .order(sites_table::code.asc())
                .select(SiteRow::as_select())
                .load::<SiteRow>(conn)?;
            Ok(rows.into_iter().map(Site::from).collect())
        })
        .await
    }

    async fn set_site_status(&self, code: &str, status: SiteStatus) -> AnalyticsResult<()> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(sites_table::table.find(&code))
                .set((
                    sites_table::is_active.eq(status.is_active()),
                    sites_table::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            if updated == 0 {
                return Err(
                    AnalyticsError::site_not_found(code.clone()).with_operation("set_site_status")
                );
            }
            Ok(())
        })
        .await
    }
}

fn row_to_entry(row: CacheRow) -> AnalyticsResult<CacheEntry> {
    let period_type = PeriodType::from_str(&row.period_type)?;
    let result: IndicatorResult = serde_json::from_value(row.result).map_err(|e| {
        AnalyticsError::cache(format!("Stored result failed to deserialize: {}", e))
            .with_indicator(row.indicator_id.clone())
            .with_site(row.site_code.clone())
    })?;
    Ok(CacheEntry {
        key: CacheKey {
            indicator_id: row.indicator_id,
            site_code: row.site_code,
            period_type,
            period_year: row.period_year,
            period_index: row.period_index as u32,
        },
        result,
        computed_at: row.computed_at,
    })
}

#[async_trait]
impl CacheRepository for PostgresAdminRepository {
    async fn get(&self, key: &CacheKey) -> AnalyticsResult<Option<CacheEntry>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let row = indicator_cache::table
                .find((
                    &key.indicator_id,
                    &key.site_code,
                    key.period_type.as_str(),
                    key.period_year,
                    key.period_index as i32,
                ))
                .select(CacheRow::as_select())
                .first::<CacheRow>(conn)
                .optional()?;
            row.map(row_to_entry).transpose()
        })
        .await
    }

    async fn put(&self, key: &CacheKey, result: &IndicatorResult) -> AnalyticsResult<()> {
        let value = serde_json::to_value(result).map_err(|e| {
            AnalyticsError::cache(format!("Result failed to serialize: {}", e))
                .with_indicator(key.indicator_id.clone())
        })?;
        let row = NewCacheRow {
            indicator_id: key.indicator_id.clone(),
            site_code: key.site_code.clone(),
            period_type: key.period_type.as_str().to_string(),
            period_year: key.period_year,
            period_index: key.period_index as i32,
            result: value,
            computed_at: Utc::now(),
        };

        self.with_conn(move |conn| {
            diesel::insert_into(indicator_cache::table)
                .values(&row)
                .on_conflict((
                    indicator_cache::indicator_id,
                    indicator_cache::site_code,
                    indicator_cache::period_type,
                    indicator_cache::period_year,
                    indicator_cache::period_index,
                ))
                .do_update()
                .set((
                    indicator_cache::result.eq(excluded(indicator_cache::result)),
                    indicator_cache::computed_at.eq(excluded(indicator_cache::computed_at)),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn invalidate_site_period(
        &self,
        site_code: &str,
        period: &ReportingPeriod,
    ) -> AnalyticsResult<usize> {
        let site_code = site_code.to_string();
        let period = *period;
        self.with_conn(move |conn| {
            let removed = diesel::delete(
                indicator_cache::table
                    .filter(indicator_cache::site_code.eq(&site_code))
                    .filter(indicator_cache::period_type.eq(period.period_type.as_str()))
                    .filter(indicator_cache::period_year.eq(period.year))
                    .filter(indicator_cache::period_index.eq(period.index as i32)),
            )
            .execute(conn)?;
            Ok(removed)
        })
        .await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AnalyticsResult<usize> {
        self.with_conn(move |conn| {
            let removed = diesel::delete(
                indicator_cache::table.filter(indicator_cache::computed_at.lt(cutoff)),
            )
            .execute(conn)?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl IndicatorFlagStore for PostgresAdminRepository {
    async fn load_flags(&self) -> AnalyticsResult<HashMap<String, bool>> {
        self.with_conn(|conn| {
            let rows = indicator_flags::table.load::<FlagRow>(conn)?;
            Ok(rows
                .into_iter()
                .map(|r| (r.indicator_id, r.is_active))
                .collect())
        })
        .await
    }

    async fn store_flag(&self, indicator_id: &str, active: bool) -> AnalyticsResult<()> {
        let row = NewFlagRow {
            indicator_id: indicator_id.to_string(),
            is_active: active,
            updated_at: Utc::now(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(indicator_flags::table)
                .values(&row)
                .on_conflict(indicator_flags::indicator_id)
                .do_update()
                .set((
                    indicator_flags::is_active.eq(excluded(indicator_flags::is_active)),
                    indicator_flags::updated_at.eq(excluded(indicator_flags::updated_at)),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}
