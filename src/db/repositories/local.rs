//! In-memory backend for unit testing and local development.
//!
//! Mirrors the Postgres backend's behavior (registry, cache, indicator
//! flags and per-site data) without a database. Site data is a flat list
//! of patient summary records per site; cohort filters are evaluated as
//! plain predicates.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::api::{
    DemographicBreakdown, IndicatorResult, PageRequest, PatientPage, PatientRow, Sex,
};
use crate::db::cache::{CacheEntry, CacheKey, CacheRepository};
use crate::db::connector::{SiteConnector, SitePoolMap, SiteRepository};
use crate::db::registry::{Site, SiteRegistry, SiteStatus};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::indicators::catalog::IndicatorFlagStore;
use crate::indicators::query::{CohortFilter, CohortQuery};
use crate::periods::ReportingPeriod;

/// One row of the flat per-site reporting view, as the local backend
/// stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    pub patient_id: String,
    pub full_name: String,
    pub sex: Sex,
    pub birth_date: NaiveDate,
    pub enrollment_date: NaiveDate,
    pub art_start_date: Option<NaiveDate>,
    pub days_enrollment_to_art: Option<i32>,
    pub status_code: String,
    pub status_date: NaiveDate,
    pub return_to_care_date: Option<NaiveDate>,
    pub transfer_in_date: Option<NaiveDate>,
    pub last_dispense_date: Option<NaiveDate>,
    pub last_dispense_days: Option<i32>,
    pub care_model_code: Option<String>,
    pub regimen_formula: Option<String>,
    pub tpt_drug: Option<String>,
    pub tpt_start_date: Option<NaiveDate>,
    pub last_vl_result: Option<i32>,
    pub last_vl_date: Option<NaiveDate>,
}

impl PatientRecord {
    /// A minimal active-on-ART record; tests override the fields they
    /// care about.
    pub fn active(patient_id: &str, sex: Sex, birth_date: NaiveDate, art_start: NaiveDate) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            full_name: format!("Patient {}", patient_id),
            sex,
            birth_date,
            enrollment_date: art_start,
            art_start_date: Some(art_start),
            days_enrollment_to_art: Some(0),
            status_code: "ACTIVE".to_string(),
            status_date: art_start,
            return_to_care_date: None,
            transfer_in_date: None,
            last_dispense_date: None,
            last_dispense_days: None,
            care_model_code: None,
            regimen_formula: None,
            tpt_drug: None,
            tpt_start_date: None,
            last_vl_result: None,
            last_vl_date: None,
        }
    }
}

#[derive(Default)]
struct LocalState {
    sites: RwLock<HashMap<String, Site>>,
    site_data: RwLock<HashMap<String, Arc<Vec<PatientRecord>>>>,
    failing_sites: RwLock<HashSet<String>>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    flags: RwLock<HashMap<String, bool>>,
}

/// In-memory administrative backend (registry + cache + indicator flags).
#[derive(Clone, Default)]
pub struct LocalBackend {
    state: Arc<LocalState>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector view sharing this backend's state.
    pub fn connector(&self) -> LocalSiteConnector {
        LocalSiteConnector {
            state: self.state.clone(),
            repos: Arc::new(SitePoolMap::new()),
            init_counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or replace) a site.
    pub fn add_site(&self, site: Site) {
        self.state.sites.write().insert(site.code.clone(), site);
    }

    /// Load the flat reporting view for one site.
    pub fn load_patients(&self, site_code: &str, records: Vec<PatientRecord>) {
        self.state
            .site_data
            .write()
            .insert(site_code.to_string(), Arc::new(records));
    }

    /// Make every query against the site fail with a connection error,
    /// simulating an unreachable site database.
    pub fn set_site_failing(&self, site_code: &str, failing: bool) {
        let mut failing_sites = self.state.failing_sites.write();
        if failing {
            failing_sites.insert(site_code.to_string());
        } else {
            failing_sites.remove(site_code);
        }
    }
}

#[async_trait]
impl SiteRegistry for LocalBackend {
    async fn get_site(&self, code: &str) -> AnalyticsResult<Option<Site>> {
        Ok(self.state.sites.read().get(code).cloned())
    }

    async fn list_sites(&self) -> AnalyticsResult<Vec<Site>> {
        let mut sites: Vec<Site> = self.state.sites.read().values().cloned().collect();
        sites.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(sites)
    }

    async fn list_active_sites(&self) -> AnalyticsResult<Vec<Site>> {
        let mut sites: Vec<Site> = self
            .state
            .sites
            .read()
            .values()
            .filter(|s| s.status.is_active())
            .cloned()
            .collect();
        sites.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(sites)
    }

    async fn set_site_status(&self, code: &str, status: SiteStatus) -> AnalyticsResult<()> {
        let mut sites = self.state.sites.write();
        let site = sites
            .get_mut(code)
            .ok_or_else(|| AnalyticsError::site_not_found(code))?;
        site.status = status;
        Ok(())
    }
}

#[async_trait]
impl CacheRepository for LocalBackend {
    async fn get(&self, key: &CacheKey) -> AnalyticsResult<Option<CacheEntry>> {
        Ok(self.state.cache.read().get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, result: &IndicatorResult) -> AnalyticsResult<()> {
        let entry = CacheEntry {
            key: key.clone(),
            result: result.clone(),
            computed_at: Utc::now(),
        };
        self.state.cache.write().insert(key.clone(), entry);
        Ok(())
    }

    async fn invalidate_site_period(
        &self,
        site_code: &str,
        period: &ReportingPeriod,
    ) -> AnalyticsResult<usize> {
        let mut cache = self.state.cache.write();
        let before = cache.len();
        cache.retain(|key, _| {
            !(key.site_code == site_code
                && key.period_type == period.period_type
                && key.period_year == period.year
                && key.period_index == period.index)
        });
        Ok(before - cache.len())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AnalyticsResult<usize> {
        let mut cache = self.state.cache.write();
        let before = cache.len();
        cache.retain(|_, entry| entry.computed_at >= cutoff);
        Ok(before - cache.len())
    }
}

#[async_trait]
impl IndicatorFlagStore for LocalBackend {
    async fn load_flags(&self) -> AnalyticsResult<HashMap<String, bool>> {
        Ok(self.state.flags.read().clone())
    }

    async fn store_flag(&self, indicator_id: &str, active: bool) -> AnalyticsResult<()> {
        self.state
            .flags
            .write()
            .insert(indicator_id.to_string(), active);
        Ok(())
    }
}

/// In-memory site connector sharing a [`LocalBackend`]'s state.
#[derive(Clone)]
pub struct LocalSiteConnector {
    state: Arc<LocalState>,
    repos: Arc<SitePoolMap<LocalSiteRepository>>,
    init_counts: Arc<RwLock<HashMap<String, usize>>>,
}

impl LocalSiteConnector {
    /// How many times a repository has been initialized for the site.
    /// Test hook for the single-pool-per-site invariant.
    pub fn init_count(&self, site_code: &str) -> usize {
        self.init_counts
            .read()
            .get(site_code)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SiteConnector for LocalSiteConnector {
    async fn resolve(&self, site_code: &str) -> AnalyticsResult<Arc<dyn SiteRepository>> {
        let site = self
            .state
            .sites
            .read()
            .get(site_code)
            .cloned()
            .ok_or_else(|| AnalyticsError::site_not_found(site_code))?;
        if !site.status.is_active() {
            return Err(AnalyticsError::site_not_found(site_code)
                .with_operation("resolve_site"));
        }

        let state = self.state.clone();
        let init_counts = self.init_counts.clone();
        let code = site_code.to_string();
        let repo = self
            .repos
            .get_or_init(site_code, move || async move {
                *init_counts.write().entry(code.clone()).or_insert(0) += 1;
                Ok(LocalSiteRepository {
                    site_code: code,
                    state,
                })
            })
            .await?;
        Ok(repo as Arc<dyn SiteRepository>)
    }

    async fn list_active_sites(&self) -> AnalyticsResult<Vec<Site>> {
        let mut sites: Vec<Site> = self
            .state
            .sites
            .read()
            .values()
            .filter(|s| s.status.is_active())
            .cloned()
            .collect();
        sites.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(sites)
    }

    async fn invalidate(&self, site_code: &str) {
        self.repos.remove(site_code);
    }
}

/// In-memory per-site repository evaluating cohort filters as predicates.
pub struct LocalSiteRepository {
    site_code: String,
    state: Arc<LocalState>,
}

impl LocalSiteRepository {
    fn records(&self) -> AnalyticsResult<Arc<Vec<PatientRecord>>> {
        if self.state.failing_sites.read().contains(&self.site_code) {
            return Err(AnalyticsError::connection(format!(
                "site database unreachable: {}",
                self.site_code
            ))
            .with_site(self.site_code.clone()));
        }
        Ok(self
            .state
            .site_data
            .read()
            .get(&self.site_code)
            .cloned()
            .unwrap_or_default())
    }

    fn matching<'a>(
        records: &'a [PatientRecord],
        query: &'a CohortQuery,
    ) -> impl Iterator<Item = &'a PatientRecord> {
        records
            .iter()
            .filter(move |r| query.filters.iter().all(|f| filter_matches(r, f)))
    }
}

fn in_range(value: Option<NaiveDate>, start: NaiveDate, end: NaiveDate) -> bool {
    value.map(|d| d >= start && d <= end).unwrap_or(false)
}

fn filter_matches(r: &PatientRecord, filter: &CohortFilter) -> bool {
    match filter {
        CohortFilter::ArtStartBetween(start, end) => in_range(r.art_start_date, *start, *end),
        CohortFilter::ArtStartOnOrBefore(d) => r.art_start_date.map(|a| a <= *d).unwrap_or(false),
        CohortFilter::StatusBecameBetween { codes, start, end } => {
            codes.contains(&r.status_code) && r.status_date >= *start && r.status_date <= *end
        }
        CohortFilter::ExcludeStatusAsOf { codes, as_of } => {
            !(codes.contains(&r.status_code) && r.status_date <= *as_of)
        }
        CohortFilter::ReturnedToCareBetween(start, end) => {
            in_range(r.return_to_care_date, *start, *end)
        }
        CohortFilter::TransferredInBetween(start, end) => {
            in_range(r.transfer_in_date, *start, *end)
        }
        CohortFilter::LastDispenseDaysAtLeast(n) => {
            r.last_dispense_days.map(|d| d >= *n).unwrap_or(false)
        }
        CohortFilter::CareModelIs(code) => r.care_model_code.as_deref() == Some(code.as_str()),
        CohortFilter::RegimenFormulaIs(formula) => {
            r.regimen_formula.as_deref() == Some(formula.as_str())
        }
        CohortFilter::TptDrugIn(drugs) => r
            .tpt_drug
            .as_ref()
            .map(|d| drugs.contains(d))
            .unwrap_or(false),
        CohortFilter::TptStartBetween(start, end) => in_range(r.tpt_start_date, *start, *end),
        CohortFilter::VlTestBetween(start, end) => in_range(r.last_vl_date, *start, *end),
        CohortFilter::VlResultBelow(threshold) => {
            r.last_vl_result.map(|v| v < *threshold).unwrap_or(false)
        }
        CohortFilter::DaysToArtStartAtMost(n) => r
            .days_enrollment_to_art
            .map(|d| d <= *n)
            .unwrap_or(false),
        CohortFilter::SexIs(sex) => r.sex == *sex,
        CohortFilter::BornAfter(cutoff) => r.birth_date > *cutoff,
        CohortFilter::BornOnOrBefore(cutoff) => r.birth_date <= *cutoff,
    }
}

#[async_trait]
impl SiteRepository for LocalSiteRepository {
    async fn count_cohort(&self, query: &CohortQuery) -> AnalyticsResult<DemographicBreakdown> {
        let records = self.records()?;
        let count = |sex: Sex, under_15: bool| {
            let bucket = query.for_bucket(sex, under_15);
            Self::matching(&records, &bucket).count() as u64
        };
        Ok(DemographicBreakdown {
            male_0_14: count(Sex::Male, true),
            female_0_14: count(Sex::Female, true),
            male_over_14: count(Sex::Male, false),
            female_over_14: count(Sex::Female, false),
        })
    }

    async fn fetch_cohort_page(
        &self,
        query: &CohortQuery,
        page: &PageRequest,
    ) -> AnalyticsResult<PatientPage> {
        let records = self.records()?;
        let needle = page.search.as_ref().map(|s| s.to_lowercase());
        let mut rows: Vec<&PatientRecord> = Self::matching(&records, query)
            .filter(|r| match &needle {
                Some(n) => {
                    r.patient_id.to_lowercase().contains(n)
                        || r.full_name.to_lowercase().contains(n)
                }
                None => true,
            })
            .collect();
        rows.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));

        let total = rows.len() as u64;
        let limit = page.effective_limit();
        let offset = page.offset() as usize;
        let rows = rows
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|r| PatientRow {
                patient_id: r.patient_id.clone(),
                full_name: r.full_name.clone(),
                sex: r.sex.code().to_string(),
                birth_date: r.birth_date,
                art_start_date: r.art_start_date,
                status_code: r.status_code.clone(),
                last_vl_result: r.last_vl_result,
            })
            .collect();

        Ok(PatientPage {
            rows,
            total,
            page: page.page.max(1),
            limit,
        })
    }
}
