//! Indicator result cache.
//!
//! Computed results are persisted keyed by (indicator, site, period type,
//! year, quarter-or-month). There is no TTL: freshness comes from the
//! scheduler re-running each period and overwriting. Writes are
//! single-key upserts, last-writer-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::IndicatorResult;
use crate::error::AnalyticsResult;
use crate::periods::{PeriodType, ReportingPeriod};

/// Exact-match composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub indicator_id: String,
    pub site_code: String,
    pub period_type: PeriodType,
    pub period_year: i32,
    /// Quarter (1-4) or month (1-12) depending on `period_type`.
    pub period_index: u32,
}

impl CacheKey {
    pub fn new(indicator_id: &str, site_code: &str, period: &ReportingPeriod) -> Self {
        Self {
            indicator_id: indicator_id.to_string(),
            site_code: site_code.to_string(),
            period_type: period.period_type,
            period_year: period.year,
            period_index: period.index,
        }
    }
}

/// A stored result plus its write timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub result: IndicatorResult,
    pub computed_at: DateTime<Utc>,
}

/// Repository trait for the indicator result cache.
///
/// A read requires an exact key match. The stored result's embedded date
/// fields are not compared against the requested period: entries written
/// before a boundary fix still serve, while every new write carries
/// canonical recomputed boundaries.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Fetch one entry; `Ok(None)` on a miss.
    async fn get(&self, key: &CacheKey) -> AnalyticsResult<Option<CacheEntry>>;

    /// Insert or overwrite one entry.
    async fn put(&self, key: &CacheKey, result: &IndicatorResult) -> AnalyticsResult<()>;

    /// Remove every indicator entry for one site and period, e.g. after a
    /// data re-import for that site.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of entries removed
    async fn invalidate_site_period(
        &self,
        site_code: &str,
        period: &ReportingPeriod,
    ) -> AnalyticsResult<usize>;

    /// Delete entries computed before `cutoff` (retention cleanup).
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of entries removed
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AnalyticsResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_period() {
        let period = ReportingPeriod::quarterly(2025, 3).unwrap();
        let key = CacheKey::new("tx_curr", "KIG001", &period);
        assert_eq!(key.period_type, PeriodType::Quarterly);
        assert_eq!(key.period_year, 2025);
        assert_eq!(key.period_index, 3);
    }

    #[test]
    fn test_keys_distinguish_period_type() {
        let q1 = ReportingPeriod::quarterly(2025, 1).unwrap();
        let m1 = ReportingPeriod::monthly(2025, 1).unwrap();
        assert_ne!(
            CacheKey::new("tx_curr", "KIG001", &q1),
            CacheKey::new("tx_curr", "KIG001", &m1)
        );
    }
}
