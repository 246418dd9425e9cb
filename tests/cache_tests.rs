//! Cache store semantics: exact-key matching, upsert, invalidation and
//! retention purge, via the in-memory implementation.

mod support;

use chrono::{Duration, Utc};

use art_analytics::api::{DemographicBreakdown, IndicatorResult};
use art_analytics::db::cache::{CacheKey, CacheRepository};
use art_analytics::periods::ReportingPeriod;

use support::*;

fn result_for(key: &CacheKey, period: &ReportingPeriod, total: u64) -> IndicatorResult {
    IndicatorResult {
        indicator_id: key.indicator_id.clone(),
        site_code: key.site_code.clone(),
        period: *period,
        total,
        numerator: total,
        denominator: None,
        percentage: None,
        breakdown: DemographicBreakdown {
            male_over_14: total,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_round_trip_and_overwrite() {
    let backend = backend_with_site("S1");
    let period = ReportingPeriod::quarterly(2025, 2).unwrap();
    let key = CacheKey::new("tx_curr", "S1", &period);

    assert!(backend.get(&key).await.unwrap().is_none());

    backend.put(&key, &result_for(&key, &period, 10)).await.unwrap();
    let entry = backend.get(&key).await.unwrap().unwrap();
    assert_eq!(entry.result.total, 10);

    // last writer wins
    backend.put(&key, &result_for(&key, &period, 11)).await.unwrap();
    let entry = backend.get(&key).await.unwrap().unwrap();
    assert_eq!(entry.result.total, 11);
}

#[tokio::test]
async fn test_invalidate_is_scoped_to_site_and_period() {
    let backend = backend_with_site("S1");
    let q2 = ReportingPeriod::quarterly(2025, 2).unwrap();
    let q1 = ReportingPeriod::quarterly(2025, 1).unwrap();

    for (indicator, site, period) in [
        ("tx_curr", "S1", &q2),
        ("tx_new", "S1", &q2),
        ("tx_curr", "S1", &q1),
        ("tx_curr", "S2", &q2),
    ] {
        let key = CacheKey::new(indicator, site, period);
        backend.put(&key, &result_for(&key, period, 1)).await.unwrap();
    }

    let removed = backend.invalidate_site_period("S1", &q2).await.unwrap();
    assert_eq!(removed, 2);

    // other site and other period untouched
    let q1_key = CacheKey::new("tx_curr", "S1", &q1);
    let s2_key = CacheKey::new("tx_curr", "S2", &q2);
    assert!(backend.get(&q1_key).await.unwrap().is_some());
    assert!(backend.get(&s2_key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_purge_respects_cutoff() {
    let backend = backend_with_site("S1");
    let period = ReportingPeriod::quarterly(2025, 2).unwrap();
    let key = CacheKey::new("tx_curr", "S1", &period);
    backend.put(&key, &result_for(&key, &period, 3)).await.unwrap();

    // cutoff in the past removes nothing
    let removed = backend
        .purge_older_than(Utc::now() - Duration::days(365))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert!(backend.get(&key).await.unwrap().is_some());

    // cutoff ahead of the write removes it
    let removed = backend
        .purge_older_than(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(backend.get(&key).await.unwrap().is_none());
}
