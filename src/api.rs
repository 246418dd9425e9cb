//! Public DTO surface for the analytics subsystem.
//!
//! This file consolidates the result types handed to callers (the HTTP
//! layer lives outside this crate and consumes these as JSON). All types
//! derive Serialize/Deserialize.

pub use crate::db::registry::{Site, SiteStatus};
pub use crate::periods::{PeriodType, ReportingPeriod};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Patient sex as recorded in site databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Stable single-letter code used in site database rows.
    pub fn code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }
}

/// Counts by sex and age band (0-14 vs over 14, at period end).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemographicBreakdown {
    pub male_0_14: u64,
    pub female_0_14: u64,
    pub male_over_14: u64,
    pub female_over_14: u64,
}

impl DemographicBreakdown {
    /// Sum of the four buckets. `IndicatorResult::total` is defined as
    /// this sum, which is what makes the breakdown invariant hold.
    pub fn total(&self) -> u64 {
        self.male_0_14 + self.female_0_14 + self.male_over_14 + self.female_over_14
    }
}

/// One computed indicator value for one site and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub indicator_id: String,
    pub site_code: String,
    pub period: ReportingPeriod,
    /// Size of the numerator cohort; always equals `breakdown.total()`.
    pub total: u64,
    pub numerator: u64,
    /// Absent for plain count indicators.
    pub denominator: Option<u64>,
    /// `None` when the denominator is zero. This is a distinct state from
    /// 0.0% and must never be collapsed into it.
    pub percentage: Option<f64>,
    pub breakdown: DemographicBreakdown,
}

impl IndicatorResult {
    /// Percentage rounded to one decimal, `None` on a zero denominator.
    pub fn derive_percentage(numerator: u64, denominator: u64) -> Option<f64> {
        if denominator == 0 {
            None
        } else {
            Some((numerator as f64 / denominator as f64 * 1000.0).round() / 10.0)
        }
    }
}

/// Catalog listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

/// Which indicators an on-demand read wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndicatorSelection {
    One(String),
    All,
}

/// On-demand read response: results plus cache provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorReport {
    pub site_code: String,
    pub period: ReportingPeriod,
    pub results: Vec<IndicatorResult>,
    pub from_cache: bool,
    /// Oldest `computed_at` among served entries; now() for fresh computes.
    pub computed_at: Option<DateTime<Utc>>,
}

/// Outcome of computing every active indicator for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteComputation {
    pub site_code: String,
    pub period: ReportingPeriod,
    pub results: Vec<IndicatorResult>,
    pub errors: Vec<IndicatorFailure>,
    pub success_count: usize,
    pub error_count: usize,
    pub execution_ms: u64,
}

/// One indicator's failure inside a `compute_all`, isolated from siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorFailure {
    pub indicator_id: String,
    pub message: String,
}

/// Pagination request for patient-level drill-down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    /// Case-insensitive substring match on patient id or name.
    pub search: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 50,
            search: None,
        }
    }
}

impl PageRequest {
    const MAX_LIMIT: u32 = 500;

    /// Effective limit, clamped to a sane upper bound.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    /// Row offset for the requested page.
    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.effective_limit() as u64
    }
}

/// One patient-level row backing an indicator (audit/drill-down).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRow {
    pub patient_id: String,
    pub full_name: String,
    pub sex: String,
    pub birth_date: NaiveDate,
    pub art_start_date: Option<NaiveDate>,
    pub status_code: String,
    pub last_vl_result: Option<i32>,
}

/// A page of patient-level rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientPage {
    pub rows: Vec<PatientRow>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}
