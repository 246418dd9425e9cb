//! Calendar-driven batch computation.
//!
//! Four background loops: a quarterly batch on the first day of each
//! quarter, a monthly batch on the first of each month, a periodic
//! health check over recent run outcomes, and cache retention cleanup.
//! Batches recompute the period containing the fire date plus the one
//! before it, so the new period is cached from day one and the closed
//! period gets a refresh for late-arriving site data.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate,
    NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::cache::{CacheKey, CacheRepository};
use crate::engine::IndicatorEngine;
use crate::error::AnalyticsResult;
use crate::periods::{PeriodType, ReportingPeriod};

#[cfg(test)]
mod tests;

/// Scheduler tuning knobs, all optional in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub quarterly_enabled: bool,
    #[serde(default = "default_true")]
    pub monthly_enabled: bool,
    /// Local hour of day (0-23) at which calendar batches fire.
    #[serde(default = "default_fire_hour")]
    pub fire_hour: u32,
    /// Offset from UTC, in whole hours, defining the operational day.
    #[serde(default)]
    pub utc_offset_hours: i32,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Cached results older than this are purged by the cleanup loop.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Concurrent (site, indicator, period) computations per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Deadline for one computation inside a batch.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// Health check warns when the recent failure ratio exceeds this.
    #[serde(default = "default_failure_warn_ratio")]
    pub failure_warn_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_fire_hour() -> u32 {
    2
}

fn default_health_interval() -> u64 {
    6 * 3600
}

fn default_cleanup_interval() -> u64 {
    7 * 24 * 3600
}

fn default_retention_days() -> i64 {
    730
}

fn default_concurrency() -> usize {
    8
}

fn default_operation_timeout() -> u64 {
    300
}

fn default_failure_warn_ratio() -> f64 {
    0.10
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            quarterly_enabled: true,
            monthly_enabled: true,
            fire_hour: default_fire_hour(),
            utc_offset_hours: 0,
            health_check_interval_secs: default_health_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            retention_days: default_retention_days(),
            concurrency: default_concurrency(),
            operation_timeout_secs: default_operation_timeout(),
            failure_warn_ratio: default_failure_warn_ratio(),
        }
    }
}

/// What started a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchTrigger {
    Quarterly,
    Monthly,
    Manual,
}

impl BatchTrigger {
    fn period_type(&self) -> PeriodType {
        match self {
            BatchTrigger::Quarterly => PeriodType::Quarterly,
            BatchTrigger::Monthly | BatchTrigger::Manual => PeriodType::Monthly,
        }
    }
}

impl fmt::Display for BatchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchTrigger::Quarterly => f.write_str("quarterly"),
            BatchTrigger::Monthly => f.write_str("monthly"),
            BatchTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// One failed computation inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub site_code: String,
    pub indicator_id: String,
    pub period: String,
    pub message: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub trigger: BatchTrigger,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success_count: usize,
    pub error_count: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.success_count + self.error_count
    }
}

const LEDGER_CAPACITY: usize = 32;

/// Bounded in-memory history of batch outcomes, consumed by the health
/// check loop and by operators via [`IndicatorScheduler::ledger`].
#[derive(Default)]
pub struct RunLedger {
    runs: Mutex<VecDeque<BatchReport>>,
}

impl RunLedger {
    pub fn record(&self, report: BatchReport) {
        let mut runs = self.runs.lock();
        if runs.len() == LEDGER_CAPACITY {
            runs.pop_front();
        }
        runs.push_back(report);
    }

    pub fn latest(&self) -> Option<BatchReport> {
        self.runs.lock().back().cloned()
    }

    /// Failed computations over all recorded runs, as a ratio of the
    /// total. Zero when nothing has run yet.
    pub fn recent_failure_ratio(&self) -> f64 {
        let runs = self.runs.lock();
        let total: usize = runs.iter().map(|r| r.total()).sum();
        if total == 0 {
            return 0.0;
        }
        let failed: usize = runs.iter().map(|r| r.error_count).sum();
        failed as f64 / total as f64
    }
}

struct SchedulerInner {
    engine: Arc<IndicatorEngine>,
    cache: Arc<dyn CacheRepository>,
    settings: SchedulerSettings,
    ledger: RunLedger,
}

/// Background scheduler driving batch computation and maintenance.
pub struct IndicatorScheduler {
    inner: Arc<SchedulerInner>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl IndicatorScheduler {
    pub fn new(
        engine: Arc<IndicatorEngine>,
        cache: Arc<dyn CacheRepository>,
        settings: SchedulerSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                engine,
                cache,
                settings,
                ledger: RunLedger::default(),
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.inner.ledger
    }

    /// Spawn the background loops. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let settings = &self.inner.settings;
        let mut handles = self.handles.lock();

        if settings.quarterly_enabled {
            handles.push(tokio::spawn(calendar_loop(
                self.inner.clone(),
                BatchTrigger::Quarterly,
                self.shutdown.subscribe(),
            )));
        }
        if settings.monthly_enabled {
            handles.push(tokio::spawn(calendar_loop(
                self.inner.clone(),
                BatchTrigger::Monthly,
                self.shutdown.subscribe(),
            )));
        }
        handles.push(tokio::spawn(health_loop(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(cleanup_loop(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));
        info!(
            quarterly = settings.quarterly_enabled,
            monthly = settings.monthly_enabled,
            "scheduler started"
        );
    }

    /// Signal shutdown and wait for the loops to finish. A batch already
    /// in flight runs to completion.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop panicked");
            }
        }
        info!("scheduler stopped");
    }

    /// Run one batch immediately, outside the calendar. Used by admin
    /// tooling and tests.
    pub async fn run_batch_now(&self, period: &ReportingPeriod) -> BatchReport {
        run_batch(&self.inner, BatchTrigger::Manual, vec![*period]).await
    }
}

fn operational_offset(settings: &SchedulerSettings) -> FixedOffset {
    FixedOffset::east_opt(settings.utc_offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
}

fn fire_time(date: NaiveDate, fire_hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(fire_hour.min(23), 0, 0).unwrap_or_default();
    date.and_time(time)
}

/// Next local instant a quarterly batch should fire: the configured hour
/// on the first day of the next quarter (or today, if that instant is
/// still ahead).
pub(crate) fn next_quarterly_fire(now: NaiveDateTime, fire_hour: u32) -> NaiveDateTime {
    let date = now.date();
    let quarter_start_month = ((date.month0() / 3) * 3) + 1;
    if date.month() == quarter_start_month && date.day() == 1 {
        let today = fire_time(date, fire_hour);
        if now < today {
            return today;
        }
    }
    let (year, month) = if quarter_start_month == 10 {
        (date.year() + 1, 1)
    } else {
        (date.year(), quarter_start_month + 3)
    };
    let next = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date);
    fire_time(next, fire_hour)
}

/// Next local instant a monthly batch should fire.
pub(crate) fn next_monthly_fire(now: NaiveDateTime, fire_hour: u32) -> NaiveDateTime {
    let date = now.date();
    if date.day() == 1 {
        let today = fire_time(date, fire_hour);
        if now < today {
            return today;
        }
    }
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let next = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date);
    fire_time(next, fire_hour)
}

/// The periods a calendar batch recomputes: the period containing
/// `fire_date` plus the immediately preceding one.
pub(crate) fn batch_periods(
    trigger: BatchTrigger,
    fire_date: NaiveDate,
) -> AnalyticsResult<Vec<ReportingPeriod>> {
    let current = ReportingPeriod::containing(fire_date, trigger.period_type())?;
    let previous = current.previous()?;
    Ok(vec![current, previous])
}

async fn calendar_loop(
    inner: Arc<SchedulerInner>,
    trigger: BatchTrigger,
    mut shutdown: watch::Receiver<bool>,
) {
    let offset = operational_offset(&inner.settings);
    loop {
        let now = Utc::now().with_timezone(&offset).naive_local();
        let next = match trigger {
            BatchTrigger::Quarterly => next_quarterly_fire(now, inner.settings.fire_hour),
            _ => next_monthly_fire(now, inner.settings.fire_hour),
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(trigger = %trigger, next = %next, "next batch scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => return,
        }

        let periods = match batch_periods(trigger, next.date()) {
            Ok(p) => p,
            Err(e) => {
                error!(trigger = %trigger, error = %e, "failed to derive batch periods");
                continue;
            }
        };
        let report = run_batch(&inner, trigger, periods).await;
        inner.ledger.record(report);
    }
}

async fn run_batch(
    inner: &Arc<SchedulerInner>,
    trigger: BatchTrigger,
    periods: Vec<ReportingPeriod>,
) -> BatchReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let started = std::time::Instant::now();
    info!(run_id = %run_id, trigger = %trigger, "batch started");

    let sites = match inner.engine.connector().list_active_sites().await {
        Ok(sites) => sites,
        Err(e) => {
            error!(run_id = %run_id, error = %e, "could not list active sites, batch aborted");
            let report = BatchReport {
                run_id,
                trigger,
                started_at,
                duration_ms: started.elapsed().as_millis() as u64,
                success_count: 0,
                error_count: 1,
                failures: vec![BatchFailure {
                    site_code: String::new(),
                    indicator_id: String::new(),
                    period: String::new(),
                    message: e.to_string(),
                }],
            };
            return report;
        }
    };

    let indicator_ids: Vec<String> = inner
        .engine
        .catalog()
        .list_active()
        .into_iter()
        .map(|d| d.id)
        .collect();

    let mut jobs = Vec::new();
    for site in &sites {
        for id in &indicator_ids {
            for period in &periods {
                jobs.push((site.code.clone(), id.clone(), *period));
            }
        }
    }

    let timeout = Duration::from_secs(inner.settings.operation_timeout_secs);
    let outcomes: Vec<Result<(), BatchFailure>> = futures::stream::iter(
        jobs.into_iter().map(|(site_code, indicator_id, period)| {
            let inner = inner.clone();
            async move {
                let failure = |message: String| BatchFailure {
                    site_code: site_code.clone(),
                    indicator_id: indicator_id.clone(),
                    period: period.label(),
                    message,
                };
                match tokio::time::timeout(
                    timeout,
                    compute_and_store(&inner, &site_code, &indicator_id, &period),
                )
                .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(failure(e.to_string())),
                    Err(_) => Err(failure(format!(
                        "computation exceeded {}s deadline",
                        timeout.as_secs()
                    ))),
                }
            }
        }),
    )
    .buffer_unordered(inner.settings.concurrency.max(1))
    .collect()
    .await;

    let mut failures = Vec::new();
    let mut success_count = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(()) => success_count += 1,
            Err(f) => failures.push(f),
        }
    }

    let report = BatchReport {
        run_id,
        trigger,
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
        success_count,
        error_count: failures.len(),
        failures,
    };
    info!(
        run_id = %run_id,
        trigger = %trigger,
        success = report.success_count,
        failed = report.error_count,
        duration_ms = report.duration_ms,
        "batch finished"
    );
    report
}

async fn compute_and_store(
    inner: &Arc<SchedulerInner>,
    site_code: &str,
    indicator_id: &str,
    period: &ReportingPeriod,
) -> AnalyticsResult<()> {
    let result = inner
        .engine
        .compute_one(site_code, indicator_id, period)
        .await?;
    let key = CacheKey::new(indicator_id, site_code, period);
    inner.cache.put(&key, &result).await?;
    Ok(())
}

async fn health_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(inner.settings.health_check_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }

        if let Err(e) = inner.engine.connector().list_active_sites().await {
            warn!(error = %e, "health check: administrative database unreachable");
            continue;
        }

        let ratio = inner.ledger.recent_failure_ratio();
        if ratio > inner.settings.failure_warn_ratio {
            warn!(
                failure_ratio = ratio,
                threshold = inner.settings.failure_warn_ratio,
                "health check: elevated batch failure ratio"
            );
        } else if let Some(latest) = inner.ledger.latest() {
            info!(
                run_id = %latest.run_id,
                failure_ratio = ratio,
                "health check: ok"
            );
        }
    }
}

async fn cleanup_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(inner.settings.cleanup_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }

        let cutoff = Utc::now() - ChronoDuration::days(inner.settings.retention_days);
        match inner.cache.purge_older_than(cutoff).await {
            Ok(removed) => info!(removed, "cache retention cleanup"),
            Err(e) => warn!(error = %e, "cache retention cleanup failed"),
        }
    }
}
