//! Per-site Postgres repositories.
//!
//! Each active site has its own database on the site database server;
//! the connector builds one read-only pool per site on first use.
//! Cohort filters are translated into Diesel expressions over the
//! `patient_summary` view, so clinical constants are always bind values.

use async_trait::async_trait;
use diesel::dsl::sql;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_types::Bool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use super::models::PatientSummaryRow;
use super::site_schema::patient_summary;
use super::PgPool;
use crate::api::{DemographicBreakdown, PageRequest, PatientPage, Sex};
use crate::db::connector::{SiteConnector, SitePoolMap, SiteRepository};
use crate::db::registry::{Site, SiteRegistry};
use crate::error::{AnalyticsError, AnalyticsResult, ErrorContext};
use crate::indicators::query::{CohortFilter, CohortQuery};

/// Site database server settings, validated.
///
/// `url_template` must contain the literal `{database}` placeholder.
#[derive(Debug, Clone)]
pub struct SitePoolConfig {
    url_template: String,
    max_pool_size: u32,
    connection_timeout_sec: u64,
}

impl SitePoolConfig {
    pub fn new(
        url_template: String,
        max_pool_size: u32,
        connection_timeout_sec: u64,
    ) -> AnalyticsResult<Self> {
        if !url_template.contains("{database}") {
            return Err(AnalyticsError::configuration(
                "Site database url_template must contain the '{database}' placeholder",
            ));
        }
        Ok(Self {
            url_template,
            max_pool_size,
            connection_timeout_sec,
        })
    }

    fn url_for(&self, database_name: &str) -> String {
        self.url_template.replace("{database}", database_name)
    }
}

/// Routes site codes to lazily-created per-site pools.
///
/// There is no automatic retry on the site path: a failed site query
/// surfaces as `ConnectionError` and is retried at the next scheduling
/// tick or user request.
pub struct PostgresSiteConnector {
    registry: Arc<dyn SiteRegistry>,
    config: SitePoolConfig,
    pools: SitePoolMap<PostgresSiteRepository>,
}

impl PostgresSiteConnector {
    pub fn new(registry: Arc<dyn SiteRegistry>, config: SitePoolConfig) -> Self {
        Self {
            registry,
            config,
            pools: SitePoolMap::new(),
        }
    }
}

fn build_site_pool(url: &str, max_size: u32, timeout_sec: u64) -> AnalyticsResult<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(url);
    Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(timeout_sec))
        .test_on_check_out(true)
        .build(manager)
        .map_err(|e| {
            AnalyticsError::connection_with_context(
                e.to_string(),
                ErrorContext::new("create_site_pool"),
            )
        })
}

#[async_trait]
impl SiteConnector for PostgresSiteConnector {
    async fn resolve(&self, site_code: &str) -> AnalyticsResult<Arc<dyn SiteRepository>> {
        let site = self
            .registry
            .get_site(site_code)
            .await?
            .ok_or_else(|| AnalyticsError::site_not_found(site_code))?;
        if !site.status.is_active() {
            return Err(AnalyticsError::site_not_found(site_code).with_operation("resolve_site"));
        }

        // A site pointed at a new database keeps its code; drop the stale
        // pool so the rebuild below picks up the new target.
        if let Some(existing) = self.pools.get(site_code) {
            if existing.database_name != site.database_name {
                tracing::info!(
                    site = site_code,
                    old = %existing.database_name,
                    new = %site.database_name,
                    "site database changed, discarding pool"
                );
                self.pools.remove(site_code);
            }
        }

        let url = self.config.url_for(&site.database_name);
        let max_size = self.config.max_pool_size;
        let timeout_sec = self.config.connection_timeout_sec;
        let code = site.code.clone();
        let database_name = site.database_name.clone();

        let repo = self
            .pools
            .get_or_init(site_code, move || async move {
                tracing::info!(site = %code, database = %database_name, "creating site pool");
                let pool = task::spawn_blocking(move || {
                    build_site_pool(&url, max_size, timeout_sec)
                })
                .await
                .map_err(|e| {
                    AnalyticsError::internal(format!("Task join error: {}", e))
                        .with_operation("spawn_blocking")
                })?
                .map_err(|e| e.with_site(code.clone()))?;
                Ok(PostgresSiteRepository {
                    site_code: code,
                    database_name,
                    pool,
                })
            })
            .await?;
        Ok(repo as Arc<dyn SiteRepository>)
    }

    async fn list_active_sites(&self) -> AnalyticsResult<Vec<Site>> {
        self.registry.list_active_sites().await
    }

    async fn invalidate(&self, site_code: &str) {
        if self.pools.remove(site_code).is_some() {
            tracing::info!(site = site_code, "discarded site pool");
        }
    }
}

/// Read-only repository over one site's `patient_summary` view.
pub struct PostgresSiteRepository {
    site_code: String,
    database_name: String,
    pool: PgPool,
}

type Cond = Box<dyn BoxableExpression<patient_summary::table, Pg, SqlType = Bool>>;

fn filter_condition(filter: &CohortFilter) -> Cond {
    use patient_summary::dsl as ps;
    match filter {
        CohortFilter::ArtStartBetween(start, end) => {
            Box::new(ps::art_start_date.assume_not_null().between(*start, *end))
        }
        CohortFilter::ArtStartOnOrBefore(date) => {
            Box::new(ps::art_start_date.assume_not_null().le(*date))
        }
        CohortFilter::StatusBecameBetween { codes, start, end } => Box::new(
            ps::status_code
                .eq_any(codes.clone())
                .and(ps::status_date.between(*start, *end)),
        ),
        CohortFilter::ExcludeStatusAsOf { codes, as_of } => Box::new(diesel::dsl::not(
            ps::status_code
                .eq_any(codes.clone())
                .and(ps::status_date.le(*as_of)),
        )),
        CohortFilter::ReturnedToCareBetween(start, end) => Box::new(
            ps::return_to_care_date
                .assume_not_null()
                .between(*start, *end),
        ),
        CohortFilter::TransferredInBetween(start, end) => Box::new(
            ps::transfer_in_date
                .assume_not_null()
                .between(*start, *end),
        ),
        CohortFilter::LastDispenseDaysAtLeast(days) => {
            Box::new(ps::last_dispense_days.assume_not_null().ge(*days))
        }
        CohortFilter::CareModelIs(code) => {
            Box::new(ps::care_model_code.assume_not_null().eq(code.clone()))
        }
        CohortFilter::RegimenFormulaIs(formula) => {
            Box::new(ps::regimen_formula.assume_not_null().eq(formula.clone()))
        }
        CohortFilter::TptDrugIn(drugs) => {
            Box::new(ps::tpt_drug.assume_not_null().eq_any(drugs.clone()))
        }
        CohortFilter::TptStartBetween(start, end) => {
            Box::new(ps::tpt_start_date.assume_not_null().between(*start, *end))
        }
        CohortFilter::VlTestBetween(start, end) => {
            Box::new(ps::last_vl_date.assume_not_null().between(*start, *end))
        }
        CohortFilter::VlResultBelow(threshold) => {
            Box::new(ps::last_vl_result.assume_not_null().lt(*threshold))
        }
        CohortFilter::DaysToArtStartAtMost(days) => {
            Box::new(ps::days_enrollment_to_art.assume_not_null().le(*days))
        }
        CohortFilter::SexIs(sex) => Box::new(ps::sex.eq(match sex {
            Sex::Male => "M",
            Sex::Female => "F",
        })),
        CohortFilter::BornAfter(cutoff) => Box::new(ps::birth_date.gt(*cutoff)),
        CohortFilter::BornOnOrBefore(cutoff) => Box::new(ps::birth_date.le(*cutoff)),
    }
}

fn cohort_condition(query: &CohortQuery) -> Cond {
    let mut cond: Cond = Box::new(sql::<Bool>("TRUE"));
    for filter in &query.filters {
        cond = Box::new(cond.and(filter_condition(filter)));
    }
    cond
}

fn page_condition(query: &CohortQuery, search: Option<&str>) -> Cond {
    use patient_summary::dsl as ps;
    let mut cond = cohort_condition(query);
    if let Some(needle) = search {
        let pattern = format!("%{}%", needle);
        cond = Box::new(cond.and(
            ps::patient_id
                .ilike(pattern.clone())
                .or(ps::full_name.ilike(pattern)),
        ));
    }
    cond
}

#[async_trait]
impl SiteRepository for PostgresSiteRepository {
    async fn count_cohort(&self, query: &CohortQuery) -> AnalyticsResult<DemographicBreakdown> {
        let pool = self.pool.clone();
        let site_code = self.site_code.clone();
        let query = query.clone();

        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                AnalyticsError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_site_connection").with_site(site_code.clone()),
                )
            })?;

            let mut count_bucket = |sex: Sex, under_15: bool| -> AnalyticsResult<u64> {
                let bucket = query.for_bucket(sex, under_15);
                let n: i64 = patient_summary::table
                    .filter(cohort_condition(&bucket))
                    .count()
                    .get_result(&mut conn)
                    .map_err(|e| AnalyticsError::from(e).with_site(site_code.clone()))?;
                Ok(n as u64)
            };

            Ok(DemographicBreakdown {
                male_0_14: count_bucket(Sex::Male, true)?,
                female_0_14: count_bucket(Sex::Female, true)?,
                male_over_14: count_bucket(Sex::Male, false)?,
                female_over_14: count_bucket(Sex::Female, false)?,
            })
        })
        .await
        .map_err(|e| {
            AnalyticsError::internal(format!("Task join error: {}", e))
                .with_operation("spawn_blocking")
        })?
    }

    async fn fetch_cohort_page(
        &self,
        query: &CohortQuery,
        page: &PageRequest,
    ) -> AnalyticsResult<PatientPage> {
        use patient_summary::dsl as ps;

        let pool = self.pool.clone();
        let site_code = self.site_code.clone();
        let query = query.clone();
        let page = page.clone();

        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                AnalyticsError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_site_connection").with_site(site_code.clone()),
                )
            })?;

            let search = page.search.as_deref();
            let total: i64 = patient_summary::table
                .filter(page_condition(&query, search))
                .count()
                .get_result(&mut conn)
                .map_err(|e| AnalyticsError::from(e).with_site(site_code.clone()))?;

            let limit = page.effective_limit();
            let rows: Vec<PatientSummaryRow> = patient_summary::table
                .filter(page_condition(&query, search))
                .order(ps::patient_id.asc())
                .limit(limit as i64)
                .offset(page.offset() as i64)
                .select(PatientSummaryRow::as_select())
                .load(&mut conn)
                .map_err(|e| AnalyticsError::from(e).with_site(site_code.clone()))?;

            Ok(PatientPage {
                rows: rows.into_iter().map(Into::into).collect(),
                total: total as u64,
                page: page.page.max(1),
                limit,
            })
        })
        .await
        .map_err(|e| {
            AnalyticsError::internal(format!("Task join error: {}", e))
                .with_operation("spawn_blocking")
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_requires_placeholder() {
        assert!(SitePoolConfig::new(
            "postgres://u:p@host:5432/fixed_db".to_string(),
            4,
            30
        )
        .is_err());

        let config = SitePoolConfig::new(
            "postgres://u:p@host:5432/{database}".to_string(),
            4,
            30,
        )
        .unwrap();
        assert_eq!(
            config.url_for("site_kig001"),
            "postgres://u:p@host:5432/site_kig001"
        );
    }
}
