//! Reporting period derivation.
//!
//! Periods are derived deterministically from (type, year, quarter|month)
//! using calendar boundaries: Q1 = Jan-Mar ... Q4 = Oct-Dec, or calendar
//! months. `previous_end_date` is the end of the immediately preceding
//! period of the same type; indicators use it to compare "new this period"
//! against "existing as of previous period".

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AnalyticsError, AnalyticsResult};

/// Granularity of a reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Quarterly,
    Monthly,
}

impl PeriodType {
    /// Stable string form used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Quarterly => "quarterly",
            PeriodType::Monthly => "monthly",
        }
    }
}

impl FromStr for PeriodType {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quarterly" | "quarter" | "q" => Ok(PeriodType::Quarterly),
            "monthly" | "month" | "m" => Ok(PeriodType::Monthly),
            other => Err(AnalyticsError::validation(format!(
                "Unknown period type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete reporting window.
///
/// `index` is the quarter (1-4) or month (1-12) depending on
/// `period_type`. The date fields are always recomputed from
/// (type, year, index); they are never taken from stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub period_type: PeriodType,
    pub year: i32,
    pub index: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub previous_end_date: NaiveDate,
}

impl ReportingPeriod {
    /// Derive a calendar quarter.
    ///
    /// # Arguments
    /// * `year` - Calendar year
    /// * `quarter` - Quarter number, 1 through 4
    pub fn quarterly(year: i32, quarter: u32) -> AnalyticsResult<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(AnalyticsError::validation(format!(
                "Quarter must be 1-4, got {}",
                quarter
            )));
        }
        let start_month = (quarter - 1) * 3 + 1;
        let start_date = first_of_month(year, start_month)?;
        let end_date = last_of_month(year, start_month + 2)?;
        Ok(Self {
            period_type: PeriodType::Quarterly,
            year,
            index: quarter,
            start_date,
            end_date,
            previous_end_date: start_date - Duration::days(1),
        })
    }

    /// Derive a calendar month.
    ///
    /// # Arguments
    /// * `year` - Calendar year
    /// * `month` - Month number, 1 through 12
    pub fn monthly(year: i32, month: u32) -> AnalyticsResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(AnalyticsError::validation(format!(
                "Month must be 1-12, got {}",
                month
            )));
        }
        let start_date = first_of_month(year, month)?;
        let end_date = last_of_month(year, month)?;
        Ok(Self {
            period_type: PeriodType::Monthly,
            year,
            index: month,
            start_date,
            end_date,
            previous_end_date: start_date - Duration::days(1),
        })
    }

    /// Derive the period of the given type containing `date`.
    pub fn containing(date: NaiveDate, period_type: PeriodType) -> AnalyticsResult<Self> {
        match period_type {
            PeriodType::Quarterly => Self::quarterly(date.year(), (date.month() - 1) / 3 + 1),
            PeriodType::Monthly => Self::monthly(date.year(), date.month()),
        }
    }

    /// The immediately preceding period of the same type.
    pub fn previous(&self) -> AnalyticsResult<Self> {
        match self.period_type {
            PeriodType::Quarterly => {
                if self.index == 1 {
                    Self::quarterly(self.year - 1, 4)
                } else {
                    Self::quarterly(self.year, self.index - 1)
                }
            }
            PeriodType::Monthly => {
                if self.index == 1 {
                    Self::monthly(self.year - 1, 12)
                } else {
                    Self::monthly(self.year, self.index - 1)
                }
            }
        }
    }

    /// Human/log label, e.g. `2025-Q2` or `2025-M04`.
    pub fn label(&self) -> String {
        match self.period_type {
            PeriodType::Quarterly => format!("{}-Q{}", self.year, self.index),
            PeriodType::Monthly => format!("{}-M{:02}", self.year, self.index),
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

fn first_of_month(year: i32, month: u32) -> AnalyticsResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AnalyticsError::validation(format!("Invalid date {}-{:02}-01", year, month)))
}

fn last_of_month(year: i32, month: u32) -> AnalyticsResult<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Ok(first_of_month(next_year, next_month)? - Duration::days(1))
}

/// Same calendar day `years` earlier, clamping Feb 29 to Feb 28.
pub fn years_before(date: NaiveDate, years: i32) -> NaiveDate {
    let year = date.year() - years;
    date.with_year(year)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 2, 28).expect("Feb 28 always exists"))
}

/// Same calendar day `months` earlier, clamping to the last day of the
/// target month when needed.
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    let total = date.year() * 12 + date.month() as i32 - 1 - months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let last = last_of_month(year, month).expect("valid month");
    let day = date.day().min(last.day());
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_quarter_boundaries() {
        let q2 = ReportingPeriod::quarterly(2025, 2).unwrap();
        assert_eq!(q2.start_date, d(2025, 4, 1));
        assert_eq!(q2.end_date, d(2025, 6, 30));
        assert_eq!(q2.previous_end_date, d(2025, 3, 31));

        let q4 = ReportingPeriod::quarterly(2025, 4).unwrap();
        assert_eq!(q4.start_date, d(2025, 10, 1));
        assert_eq!(q4.end_date, d(2025, 12, 31));
    }

    #[test]
    fn test_q1_previous_end_crosses_year() {
        let q1 = ReportingPeriod::quarterly(2025, 1).unwrap();
        assert_eq!(q1.previous_end_date, d(2024, 12, 31));
    }

    #[test]
    fn test_monthly_boundaries() {
        let feb = ReportingPeriod::monthly(2024, 2).unwrap();
        assert_eq!(feb.start_date, d(2024, 2, 1));
        assert_eq!(feb.end_date, d(2024, 2, 29)); // leap year
        assert_eq!(feb.previous_end_date, d(2024, 1, 31));
    }

    #[test]
    fn test_invalid_indices_rejected() {
        assert!(ReportingPeriod::quarterly(2025, 0).is_err());
        assert!(ReportingPeriod::quarterly(2025, 5).is_err());
        assert!(ReportingPeriod::monthly(2025, 13).is_err());
    }

    #[test]
    fn test_containing() {
        let p = ReportingPeriod::containing(d(2025, 8, 15), PeriodType::Quarterly).unwrap();
        assert_eq!(p.index, 3);
        assert_eq!(p.start_date, d(2025, 7, 1));

        let m = ReportingPeriod::containing(d(2025, 8, 15), PeriodType::Monthly).unwrap();
        assert_eq!(m.index, 8);
    }

    #[test]
    fn test_previous_period() {
        let q1 = ReportingPeriod::quarterly(2025, 1).unwrap();
        let prev = q1.previous().unwrap();
        assert_eq!(prev.year, 2024);
        assert_eq!(prev.index, 4);

        let jan = ReportingPeriod::monthly(2025, 1).unwrap();
        let dec = jan.previous().unwrap();
        assert_eq!(dec.year, 2024);
        assert_eq!(dec.index, 12);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ReportingPeriod::quarterly(2025, 2).unwrap().label(), "2025-Q2");
        assert_eq!(ReportingPeriod::monthly(2025, 4).unwrap().label(), "2025-M04");
    }

    #[test]
    fn test_years_before_leap_day() {
        assert_eq!(years_before(d(2024, 2, 29), 1), d(2023, 2, 28));
        assert_eq!(years_before(d(2025, 6, 30), 1), d(2024, 6, 30));
    }

    #[test]
    fn test_months_before_clamps() {
        assert_eq!(months_before(d(2025, 3, 31), 1), d(2025, 2, 28));
        assert_eq!(months_before(d(2025, 1, 15), 6), d(2024, 7, 15));
    }
}
