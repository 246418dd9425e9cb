//! Indicator computation engine.
//!
//! The engine glues a [`SiteConnector`], an [`IndicatorCatalog`] and an
//! optional result cache together. It owns no clinical rules itself:
//! definitions produce declarative cohort queries, the per-site
//! repository counts them, and the engine assembles results, isolates
//! per-indicator failures and applies cache semantics.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::api::{
    IndicatorFailure, IndicatorReport, IndicatorResult, IndicatorSelection, PageRequest,
    PatientPage, SiteComputation,
};
use crate::db::cache::{CacheKey, CacheRepository};
use crate::db::connector::{SiteConnector, SiteRepository};
use crate::error::{AnalyticsError, AnalyticsResult, ErrorContext};
use crate::indicators::catalog::{IndicatorCatalog, IndicatorDefinition};
use crate::indicators::params::IndicatorParams;
use crate::periods::ReportingPeriod;

/// Computes indicators for sites and periods.
pub struct IndicatorEngine {
    connector: Arc<dyn SiteConnector>,
    catalog: Arc<IndicatorCatalog>,
    params: IndicatorParams,
    cache: Option<Arc<dyn CacheRepository>>,
}

impl IndicatorEngine {
    pub fn new(
        connector: Arc<dyn SiteConnector>,
        catalog: Arc<IndicatorCatalog>,
        params: IndicatorParams,
    ) -> Self {
        Self {
            connector,
            catalog,
            params,
            cache: None,
        }
    }

    /// Attach a result cache backend.
    pub fn with_cache(mut self, cache: Arc<dyn CacheRepository>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn connector(&self) -> &Arc<dyn SiteConnector> {
        &self.connector
    }

    pub fn catalog(&self) -> &Arc<IndicatorCatalog> {
        &self.catalog
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Compute one indicator for one site and period, bypassing the cache.
    ///
    /// # Returns
    /// * `Err(UnknownIndicator)` - id not in the catalog
    /// * `Err(IndicatorDisabled)` - id disabled by an operator
    /// * `Err(SiteNotFound)` / `Err(ConnectionError)` - site unreachable
    /// * `Err(ComputationError)` - the indicator itself failed
    pub async fn compute_one(
        &self,
        site_code: &str,
        indicator_id: &str,
        period: &ReportingPeriod,
    ) -> AnalyticsResult<IndicatorResult> {
        let def = self.catalog.get(indicator_id)?;
        if !self.catalog.is_active(indicator_id) {
            return Err(AnalyticsError::indicator_disabled(indicator_id));
        }
        let repo = self.connector.resolve(site_code).await?;
        self.compute_with_repo(repo.as_ref(), &def, site_code, period)
            .await
    }

    /// Compute every active indicator for one site and period.
    ///
    /// A failing indicator is recorded and does not abort its siblings;
    /// only failure to reach the site at all is a hard error.
    pub async fn compute_all(
        &self,
        site_code: &str,
        period: &ReportingPeriod,
    ) -> AnalyticsResult<SiteComputation> {
        let started = Instant::now();
        let repo = self.connector.resolve(site_code).await?;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for def in self.catalog.list_active() {
            match self
                .compute_with_repo(repo.as_ref(), &def, site_code, period)
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(
                        site = site_code,
                        indicator = %def.id,
                        period = %period.label(),
                        error = %e,
                        "indicator computation failed"
                    );
                    errors.push(IndicatorFailure {
                        indicator_id: def.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(SiteComputation {
            site_code: site_code.to_string(),
            period: *period,
            success_count: results.len(),
            error_count: errors.len(),
            results,
            errors,
            execution_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Patient-level rows behind an indicator's numerator cohort.
    pub async fn compute_details(
        &self,
        site_code: &str,
        indicator_id: &str,
        period: &ReportingPeriod,
        page: &PageRequest,
    ) -> AnalyticsResult<PatientPage> {
        let def = self.catalog.get(indicator_id)?;
        if !self.catalog.is_active(indicator_id) {
            return Err(AnalyticsError::indicator_disabled(indicator_id));
        }
        let repo = self.connector.resolve(site_code).await?;
        let query = def
            .compute
            .numerator(period, &self.params)
            .map_err(|e| self.classify(e, site_code, indicator_id, "compute_details"))?;
        repo.fetch_cohort_page(&query, page)
            .await
            .map_err(|e| self.classify(e, site_code, indicator_id, "compute_details"))
    }

    /// On-demand read with cache semantics.
    ///
    /// With `use_cache` set, cached entries are served on an exact key
    /// match and misses are computed fresh and written back. Without it,
    /// everything is computed fresh (and written back when a cache is
    /// configured). A cached read without a configured cache backend is
    /// an error, never a silent fallback to fresh computation.
    pub async fn report(
        &self,
        site_code: &str,
        selection: &IndicatorSelection,
        period: &ReportingPeriod,
        use_cache: bool,
    ) -> AnalyticsResult<IndicatorReport> {
        if use_cache && self.cache.is_none() {
            return Err(AnalyticsError::not_implemented(
                "Result cache backend is not configured",
            )
            .with_operation("report")
            .with_site(site_code));
        }

        let defs: Vec<IndicatorDefinition> = match selection {
            IndicatorSelection::One(id) => {
                let def = self.catalog.get(id)?;
                if !self.catalog.is_active(id) {
                    return Err(AnalyticsError::indicator_disabled(id.clone()));
                }
                vec![def]
            }
            IndicatorSelection::All => self.catalog.list_active(),
        };

        let mut results = Vec::new();
        let mut oldest_hit = None;
        let mut hits = 0usize;
        let mut repo: Option<Arc<dyn SiteRepository>> = None;

        for def in &defs {
            let key = CacheKey::new(&def.id, site_code, period);

            if let (true, Some(cache)) = (use_cache, &self.cache) {
                match cache.get(&key).await {
                    Ok(Some(entry)) => {
                        hits += 1;
                        oldest_hit = Some(match oldest_hit {
                            Some(prev) if prev < entry.computed_at => prev,
                            _ => entry.computed_at,
                        });
                        results.push(entry.result);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            site = site_code,
                            indicator = %def.id,
                            error = %e,
                            "cache read failed, computing fresh"
                        );
                    }
                }
            }

            let site_repo = match repo.clone() {
                Some(r) => r,
                None => {
                    let r = self.connector.resolve(site_code).await?;
                    repo = Some(r.clone());
                    r
                }
            };
            let result = self
                .compute_with_repo(site_repo.as_ref(), def, site_code, period)
                .await?;
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put(&key, &result).await {
                    warn!(
                        site = site_code,
                        indicator = %def.id,
                        error = %e,
                        "cache write failed"
                    );
                }
            }
            results.push(result);
        }

        let from_cache = !results.is_empty() && hits == results.len();
        let computed_at = if results.is_empty() {
            None
        } else if from_cache {
            oldest_hit
        } else {
            Some(Utc::now())
        };

        Ok(IndicatorReport {
            site_code: site_code.to_string(),
            period: *period,
            results,
            from_cache,
            computed_at,
        })
    }

    async fn compute_with_repo(
        &self,
        repo: &dyn SiteRepository,
        def: &IndicatorDefinition,
        site_code: &str,
        period: &ReportingPeriod,
    ) -> AnalyticsResult<IndicatorResult> {
        let classify = |e| self.classify(e, site_code, &def.id, "compute_indicator");

        let num_query = def.compute.numerator(period, &self.params).map_err(classify)?;
        let den_query = def.compute.denominator(period, &self.params).map_err(classify)?;

        let (breakdown, denominator) = match den_query {
            Some(dq) => {
                let (num, den) =
                    tokio::try_join!(repo.count_cohort(&num_query), repo.count_cohort(&dq))
                        .map_err(classify)?;
                (num, Some(den.total()))
            }
            None => {
                let num = repo.count_cohort(&num_query).await.map_err(classify)?;
                (num, None)
            }
        };

        let numerator = breakdown.total();
        let percentage = denominator.and_then(|d| IndicatorResult::derive_percentage(numerator, d));

        Ok(IndicatorResult {
            indicator_id: def.id.clone(),
            site_code: site_code.to_string(),
            period: *period,
            total: numerator,
            numerator,
            denominator,
            percentage,
            breakdown,
        })
    }

    /// Connection-level failures keep their variant so callers can retry;
    /// everything else becomes a `ComputationError` tied to the indicator.
    fn classify(
        &self,
        err: AnalyticsError,
        site_code: &str,
        indicator_id: &str,
        operation: &str,
    ) -> AnalyticsError {
        match err {
            e @ (AnalyticsError::ConnectionError { .. }
            | AnalyticsError::SiteNotFound { .. }
            | AnalyticsError::Timeout { .. }) => e
                .with_site(site_code)
                .with_indicator(indicator_id)
                .with_operation(operation),
            other => AnalyticsError::computation_with_context(
                other.to_string(),
                ErrorContext::new(operation)
                    .with_site(site_code)
                    .with_indicator(indicator_id),
            ),
        }
    }
}
