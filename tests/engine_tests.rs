//! Engine behavior over the in-memory backend, with a population small
//! enough to check the indicator arithmetic by hand.

mod support;

use art_analytics::api::IndicatorSelection;
use art_analytics::engine::IndicatorEngine;
use art_analytics::error::AnalyticsError;
use art_analytics::indicators::{
    CohortIndicator, IndicatorCatalog, IndicatorDefinition, IndicatorParams,
};
use art_analytics::periods::ReportingPeriod;
use std::sync::Arc;

use support::*;

fn q2_2025() -> ReportingPeriod {
    ReportingPeriod::quarterly(2025, 2).unwrap()
}

#[tokio::test]
async fn test_tx_curr_counts_and_breakdown() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());
    let engine = engine_over(&backend);

    let result = engine.compute_one("S1", "tx_curr", &q2_2025()).await.unwrap();
    assert_eq!(result.total, 4); // P004 died before period end
    assert_eq!(result.numerator, 4);
    assert_eq!(result.denominator, None);
    assert_eq!(result.percentage, None);
    assert_eq!(result.breakdown.male_over_14, 1);
    assert_eq!(result.breakdown.female_over_14, 2);
    assert_eq!(result.breakdown.female_0_14, 1);
    assert_eq!(result.breakdown.male_0_14, 0);
    // the invariant: total is the sum of the buckets
    assert_eq!(result.total, result.breakdown.total());
}

#[tokio::test]
async fn test_tx_new_counts_only_in_period_starts() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());
    let engine = engine_over(&backend);

    let result = engine.compute_one("S1", "tx_new", &q2_2025()).await.unwrap();
    assert_eq!(result.total, 1); // only P002 started in Q2
}

#[tokio::test]
async fn test_mortality_ratio_against_previous_period_cohort() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());
    let engine = engine_over(&backend);

    let result = engine
        .compute_one("S1", "tx_ml_dead", &q2_2025())
        .await
        .unwrap();
    assert_eq!(result.numerator, 1); // P004
    // P001, P003, P004, P005 were active as of 2025-03-31; P002 was not
    assert_eq!(result.denominator, Some(4));
    assert_eq!(result.percentage, Some(25.0));
}

#[tokio::test]
async fn test_vl_suppression() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());
    let engine = engine_over(&backend);

    let result = engine
        .compute_one("S1", "vl_suppression", &q2_2025())
        .await
        .unwrap();
    assert_eq!(result.numerator, 1); // P001 at 40 copies
    assert_eq!(result.denominator, Some(2)); // P001 and P005 tested
    assert_eq!(result.percentage, Some(50.0));
}

#[tokio::test]
async fn test_zero_denominator_yields_no_percentage() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", Vec::new());
    let engine = engine_over(&backend);

    let result = engine
        .compute_one("S1", "tx_ml_dead", &q2_2025())
        .await
        .unwrap();
    assert_eq!(result.denominator, Some(0));
    assert_eq!(result.percentage, None);
}

#[tokio::test]
async fn test_compute_all_isolates_failing_indicator() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());

    let mut catalog = IndicatorCatalog::builtin();
    catalog
        .register(IndicatorDefinition::new(
            "always_broken",
            "Broken",
            "",
            CohortIndicator::count(|_, _| {
                Err(AnalyticsError::validation("unusable parameters"))
            }),
        ))
        .unwrap();
    let total = catalog.list_active().len();

    let engine = IndicatorEngine::new(
        Arc::new(backend.connector()),
        Arc::new(catalog),
        IndicatorParams::default(),
    );

    let outcome = engine.compute_all("S1", &q2_2025()).await.unwrap();
    assert_eq!(outcome.error_count, 1);
    assert_eq!(outcome.success_count, total - 1);
    assert_eq!(outcome.errors[0].indicator_id, "always_broken");
}

#[tokio::test]
async fn test_unreachable_site_aborts_compute_all() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());
    backend.set_site_failing("S1", true);
    let engine = engine_over(&backend);

    // resolution succeeds (the pool is lazily healthy) but every query
    // fails; each indicator is reported individually
    let outcome = engine.compute_all("S1", &q2_2025()).await.unwrap();
    assert_eq!(outcome.success_count, 0);
    assert!(outcome.error_count > 0);
}

#[tokio::test]
async fn test_unknown_site_is_an_error() {
    let backend = backend_with_site("S1");
    let engine = engine_over(&backend);

    let err = engine
        .compute_one("NOPE", "tx_curr", &q2_2025())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::SiteNotFound { .. }));

    let err = engine
        .report("NOPE", &IndicatorSelection::All, &q2_2025(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::SiteNotFound { .. }));
}

#[tokio::test]
async fn test_compute_details_pages_the_numerator_cohort() {
    let backend = backend_with_site("S1");
    backend.load_patients("S1", q2_2025_population());
    let engine = engine_over(&backend);

    let page = engine
        .compute_details("S1", "tx_curr", &q2_2025(), &Default::default())
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    let ids: Vec<&str> = page.rows.iter().map(|r| r.patient_id.as_str()).collect();
    assert_eq!(ids, vec!["P001", "P002", "P003", "P005"]);
}
