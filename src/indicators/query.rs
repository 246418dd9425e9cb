//! Declarative cohort queries.
//!
//! An indicator computation is expressed as a [`CohortQuery`]: a list of
//! typed filters over the per-site `patient_summary` reporting view. Each
//! backend translates the filters itself (Diesel expressions for Postgres,
//! in-memory predicates for the local backend), so clinical constants are
//! always bind values, never text spliced into SQL.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::Sex;
use crate::periods::years_before;

/// A typed filter over the patient summary view. All date ranges are
/// inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CohortFilter {
    /// ART start date falls inside the range.
    ArtStartBetween(NaiveDate, NaiveDate),
    /// ART started on or before the date (on treatment as of that day).
    ArtStartOnOrBefore(NaiveDate),
    /// Latest status moved to one of `codes` during the range.
    StatusBecameBetween {
        codes: Vec<String>,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Exclude patients whose latest status was one of `codes` on or
    /// before `as_of`. Combined with `ArtStartOnOrBefore` this defines
    /// the "active on ART as of" cohort.
    ExcludeStatusAsOf {
        codes: Vec<String>,
        as_of: NaiveDate,
    },
    /// Returned to care (treatment re-initiation) during the range.
    ReturnedToCareBetween(NaiveDate, NaiveDate),
    /// Transferred in from another site during the range.
    TransferredInBetween(NaiveDate, NaiveDate),
    /// Latest ARV dispense covered at least this many days.
    LastDispenseDaysAtLeast(i32),
    /// Enrolled in the given differentiated-care model.
    CareModelIs(String),
    /// Current regimen formula matches exactly.
    RegimenFormulaIs(String),
    /// On one of the listed TPT drugs.
    TptDrugIn(Vec<String>),
    /// Started TPT during the range.
    TptStartBetween(NaiveDate, NaiveDate),
    /// Most recent viral load test falls inside the range.
    VlTestBetween(NaiveDate, NaiveDate),
    /// Most recent viral load result is strictly below the threshold.
    VlResultBelow(i32),
    /// Days between enrollment and ART start is at most `n`.
    DaysToArtStartAtMost(i32),
    /// Patient sex matches. Appended by backends for the demographic
    /// breakdown; definitions normally do not set it themselves.
    SexIs(Sex),
    /// Born strictly after the date (younger than the band cutoff).
    BornAfter(NaiveDate),
    /// Born on or before the date (at or above the band cutoff).
    BornOnOrBefore(NaiveDate),
}

/// One cohort: filters plus the reference date for age banding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortQuery {
    /// Date at which patient ages are evaluated (normally the period end).
    pub age_reference: NaiveDate,
    pub filters: Vec<CohortFilter>,
}

impl CohortQuery {
    pub fn new(age_reference: NaiveDate) -> Self {
        Self {
            age_reference,
            filters: Vec::new(),
        }
    }

    pub fn with(mut self, filter: CohortFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn extend(mut self, filters: impl IntoIterator<Item = CohortFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Birth date cutoff for the 0-14 vs over-14 age bands: born after
    /// this date means age 0-14 at `age_reference`.
    pub fn age_band_cutoff(&self) -> NaiveDate {
        years_before(self.age_reference, 15)
    }

    /// The query narrowed to one demographic bucket.
    pub fn for_bucket(&self, sex: Sex, under_15: bool) -> CohortQuery {
        let cutoff = self.age_band_cutoff();
        let band = if under_15 {
            CohortFilter::BornAfter(cutoff)
        } else {
            CohortFilter::BornOnOrBefore(cutoff)
        };
        self.clone().with(CohortFilter::SexIs(sex)).with(band)
    }
}
