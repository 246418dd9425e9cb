use super::*;
use crate::db::registry::{Site, SiteStatus};
use crate::db::repositories::local::LocalBackend;
use crate::indicators::catalog::IndicatorCatalog;
use crate::indicators::params::IndicatorParams;

fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

#[test]
fn test_next_quarterly_fire_mid_quarter() {
    assert_eq!(
        next_quarterly_fire(dt(2025, 2, 15, 12, 0), 2),
        dt(2025, 4, 1, 2, 0)
    );
}

#[test]
fn test_next_quarterly_fire_on_fire_day() {
    // before the fire hour on the quarter's first day: fire today
    assert_eq!(
        next_quarterly_fire(dt(2025, 4, 1, 1, 0), 2),
        dt(2025, 4, 1, 2, 0)
    );
    // after the fire hour: wait for the next quarter
    assert_eq!(
        next_quarterly_fire(dt(2025, 4, 1, 3, 0), 2),
        dt(2025, 7, 1, 2, 0)
    );
}

#[test]
fn test_next_quarterly_fire_crosses_year() {
    assert_eq!(
        next_quarterly_fire(dt(2025, 11, 5, 9, 0), 2),
        dt(2026, 1, 1, 2, 0)
    );
}

#[test]
fn test_next_monthly_fire() {
    assert_eq!(
        next_monthly_fire(dt(2025, 4, 10, 0, 0), 2),
        dt(2025, 5, 1, 2, 0)
    );
    assert_eq!(
        next_monthly_fire(dt(2025, 12, 31, 23, 0), 2),
        dt(2026, 1, 1, 2, 0)
    );
    assert_eq!(
        next_monthly_fire(dt(2025, 5, 1, 0, 30), 2),
        dt(2025, 5, 1, 2, 0)
    );
}

#[test]
fn test_batch_periods_cover_current_and_previous() {
    // a fire on the first day of Q2 caches Q2 immediately and refreshes Q1
    let fire = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
    let periods = batch_periods(BatchTrigger::Quarterly, fire).unwrap();
    assert_eq!(periods.len(), 2);
    assert_eq!(periods[0].label(), "2025-Q2");
    assert_eq!(periods[1].label(), "2025-Q1");

    let jan = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let months = batch_periods(BatchTrigger::Monthly, jan).unwrap();
    assert_eq!(months[0].label(), "2026-M01");
    assert_eq!(months[1].label(), "2025-M12");
}

fn report_with(success: usize, failed: usize) -> BatchReport {
    BatchReport {
        run_id: Uuid::new_v4(),
        trigger: BatchTrigger::Manual,
        started_at: Utc::now(),
        duration_ms: 1,
        success_count: success,
        error_count: failed,
        failures: Vec::new(),
    }
}

#[test]
fn test_ledger_failure_ratio() {
    let ledger = RunLedger::default();
    assert_eq!(ledger.recent_failure_ratio(), 0.0);

    ledger.record(report_with(9, 1));
    ledger.record(report_with(8, 2));
    let ratio = ledger.recent_failure_ratio();
    assert!((ratio - 0.15).abs() < 1e-9);
}

#[test]
fn test_ledger_is_bounded() {
    let ledger = RunLedger::default();
    for i in 0..(LEDGER_CAPACITY + 10) {
        ledger.record(report_with(i, 0));
    }
    assert_eq!(ledger.latest().unwrap().success_count, LEDGER_CAPACITY + 9);
    // oldest entries dropped: ratio only reflects retained runs
    assert_eq!(ledger.runs.lock().len(), LEDGER_CAPACITY);
}

fn scheduler_over(backend: &LocalBackend, settings: SchedulerSettings) -> IndicatorScheduler {
    let connector = Arc::new(backend.connector());
    let catalog = Arc::new(IndicatorCatalog::builtin());
    let engine = Arc::new(IndicatorEngine::new(
        connector,
        catalog,
        IndicatorParams::default(),
    ));
    IndicatorScheduler::new(engine, Arc::new(backend.clone()), settings)
}

fn site(code: &str) -> Site {
    Site {
        code: code.to_string(),
        display_name: code.to_string(),
        database_name: format!("db_{}", code.to_lowercase()),
        status: SiteStatus::Active,
    }
}

#[tokio::test]
async fn test_manual_batch_isolates_failing_site() {
    let backend = LocalBackend::new();
    backend.add_site(site("GOOD"));
    backend.add_site(site("BAD"));
    backend.load_patients("GOOD", Vec::new());
    backend.set_site_failing("BAD", true);

    let scheduler = scheduler_over(&backend, SchedulerSettings::default());
    let period = ReportingPeriod::quarterly(2025, 1).unwrap();
    let report = scheduler.run_batch_now(&period).await;

    let indicator_count = scheduler
        .inner
        .engine
        .catalog()
        .list_active()
        .len();
    assert_eq!(report.success_count, indicator_count);
    assert_eq!(report.error_count, indicator_count);
    assert!(report.failures.iter().all(|f| f.site_code == "BAD"));

    // successful site's results were cached
    use crate::db::cache::CacheRepository;
    let key = CacheKey::new("tx_curr", "GOOD", &period);
    assert!(backend.get(&key).await.unwrap().is_some());
    let bad_key = CacheKey::new("tx_curr", "BAD", &period);
    assert!(backend.get(&bad_key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() {
    let backend = LocalBackend::new();
    let scheduler = scheduler_over(&backend, SchedulerSettings::default());

    scheduler.start();
    assert!(!scheduler.handles.lock().is_empty());
    // second start is a no-op
    scheduler.start();

    scheduler.stop().await;
    assert!(scheduler.handles.lock().is_empty());
}
