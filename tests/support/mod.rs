//! Shared fixtures for integration tests: an in-memory backend with a
//! small, hand-checkable patient population.

// not every test binary uses every fixture
#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use art_analytics::api::Sex;
use art_analytics::db::registry::{Site, SiteStatus};
use art_analytics::db::repositories::local::{LocalBackend, PatientRecord};
use art_analytics::engine::IndicatorEngine;
use art_analytics::indicators::{IndicatorCatalog, IndicatorParams};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn site(code: &str) -> Site {
    Site {
        code: code.to_string(),
        display_name: format!("Clinic {}", code),
        database_name: format!("site_{}", code.to_lowercase()),
        status: SiteStatus::Active,
    }
}

pub fn backend_with_site(code: &str) -> LocalBackend {
    let backend = LocalBackend::new();
    backend.add_site(site(code));
    backend
}

/// Engine over the backend's connector with the builtin catalog,
/// no cache attached.
pub fn engine_over(backend: &LocalBackend) -> IndicatorEngine {
    IndicatorEngine::new(
        Arc::new(backend.connector()),
        Arc::new(IndicatorCatalog::builtin()),
        IndicatorParams::default(),
    )
}

/// Engine whose cache is the backend itself.
pub fn cached_engine_over(backend: &LocalBackend) -> IndicatorEngine {
    engine_over(backend).with_cache(Arc::new(backend.clone()))
}

/// Active male adult, on ART since well before 2025.
pub fn adult_on_art(id: &str) -> PatientRecord {
    PatientRecord::active(id, Sex::Male, d(1985, 3, 12), d(2022, 5, 10))
}

/// Population for reporting period Q2 2025 (Apr 1 - Jun 30):
/// - P001 male adult, on ART since 2022, suppressed VL in window
/// - P002 female adult, started ART 2025-05-15 (new this period)
/// - P003 female child (born 2015), on ART since 2024
/// - P004 male adult, died 2025-05-01 (was active before)
/// - P005 female adult, unsuppressed VL in window
pub fn q2_2025_population() -> Vec<PatientRecord> {
    let mut p1 = PatientRecord::active("P001", Sex::Male, d(1985, 3, 12), d(2022, 5, 10));
    p1.last_vl_date = Some(d(2025, 2, 1));
    p1.last_vl_result = Some(40);

    let mut p2 = PatientRecord::active("P002", Sex::Female, d(1990, 7, 4), d(2025, 5, 15));
    p2.enrollment_date = d(2025, 5, 15);
    p2.days_enrollment_to_art = Some(0);

    let p3 = PatientRecord::active("P003", Sex::Female, d(2015, 1, 20), d(2024, 3, 1));

    let mut p4 = PatientRecord::active("P004", Sex::Male, d(1978, 11, 2), d(2020, 1, 1));
    p4.status_code = "DEAD".to_string();
    p4.status_date = d(2025, 5, 1);

    let mut p5 = PatientRecord::active("P005", Sex::Female, d(1995, 9, 30), d(2023, 8, 1));
    p5.last_vl_date = Some(d(2025, 4, 10));
    p5.last_vl_result = Some(12_000);

    vec![p1, p2, p3, p4, p5]
}
