//! Builtin indicator definitions.
//!
//! A representative subset of the program's indicator set, expressed as
//! cohort queries. The ids are the cache keys; they must never change
//! once results have been stored under them.

use chrono::NaiveDate;

use crate::indicators::catalog::{CohortIndicator, IndicatorDefinition};
use crate::indicators::params::IndicatorParams;
use crate::indicators::query::{CohortFilter, CohortQuery};
use crate::periods::{months_before, years_before, ReportingPeriod};

/// Patients on ART and not dead/lost/transferred-out as of `as_of`.
fn active_on_art(as_of: NaiveDate, age_reference: NaiveDate, params: &IndicatorParams) -> CohortQuery {
    CohortQuery::new(age_reference)
        .with(CohortFilter::ArtStartOnOrBefore(as_of))
        .with(CohortFilter::ExcludeStatusAsOf {
            codes: params.exit_codes(),
            as_of,
        })
}

pub fn builtin_definitions() -> Vec<IndicatorDefinition> {
    vec![
        IndicatorDefinition::new(
            "tx_curr",
            "Currently on ART",
            "Patients on antiretroviral therapy as of the end of the period",
            CohortIndicator::count(|p, params| Ok(active_on_art(p.end_date, p.end_date, params))),
        ),
        IndicatorDefinition::new(
            "tx_new",
            "Newly initiated on ART",
            "Patients who started antiretroviral therapy during the period",
            CohortIndicator::count(|p, _| {
                Ok(CohortQuery::new(p.end_date)
                    .with(CohortFilter::ArtStartBetween(p.start_date, p.end_date)))
            }),
        ),
        IndicatorDefinition::new(
            "tx_ml_dead",
            "Deaths among ART patients",
            "Patients recorded dead during the period, against the cohort \
             active at the end of the previous period",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(CohortQuery::new(p.end_date).with(CohortFilter::StatusBecameBetween {
                        codes: vec![params.dead_code.clone()],
                        start: p.start_date,
                        end: p.end_date,
                    }))
                },
                |p, params| Ok(active_on_art(p.previous_end_date, p.end_date, params)),
            ),
        ),
        IndicatorDefinition::new(
            "tx_ml_lost",
            "Lost to follow-up",
            "Patients recorded lost to follow-up during the period, against \
             the cohort active at the end of the previous period",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(CohortQuery::new(p.end_date).with(CohortFilter::StatusBecameBetween {
                        codes: vec![params.lost_code.clone()],
                        start: p.start_date,
                        end: p.end_date,
                    }))
                },
                |p, params| Ok(active_on_art(p.previous_end_date, p.end_date, params)),
            ),
        ),
        IndicatorDefinition::new(
            "tx_ml_transfer_out",
            "Transferred out",
            "Patients transferred out during the period, against the cohort \
             active at the end of the previous period",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(CohortQuery::new(p.end_date).with(CohortFilter::StatusBecameBetween {
                        codes: vec![params.transfer_out_code.clone()],
                        start: p.start_date,
                        end: p.end_date,
                    }))
                },
                |p, params| Ok(active_on_art(p.previous_end_date, p.end_date, params)),
            ),
        ),
        IndicatorDefinition::new(
            "tx_rtt",
            "Returned to treatment",
            "Patients who returned to care during the period and are active \
             at period end",
            CohortIndicator::count(|p, params| {
                Ok(CohortQuery::new(p.end_date)
                    .with(CohortFilter::ReturnedToCareBetween(p.start_date, p.end_date))
                    .with(CohortFilter::ExcludeStatusAsOf {
                        codes: params.exit_codes(),
                        as_of: p.end_date,
                    }))
            }),
        ),
        IndicatorDefinition::new(
            "transfer_in",
            "Transferred in",
            "Patients transferred in from another site during the period",
            CohortIndicator::count(|p, _| {
                Ok(CohortQuery::new(p.end_date)
                    .with(CohortFilter::TransferredInBetween(p.start_date, p.end_date)))
            }),
        ),
        IndicatorDefinition::new(
            "retention_12m",
            "12-month retention",
            "Patients who started ART twelve months before the period and \
             are still active at period end",
            CohortIndicator::ratio(
                |p, params| {
                    let cohort_start = years_before(p.start_date, 1);
                    let cohort_end = years_before(p.end_date, 1);
                    Ok(CohortQuery::new(p.end_date)
                        .with(CohortFilter::ArtStartBetween(cohort_start, cohort_end))
                        .with(CohortFilter::ExcludeStatusAsOf {
                            codes: params.exit_codes(),
                            as_of: p.end_date,
                        }))
                },
                |p, _| {
                    let cohort_start = years_before(p.start_date, 1);
                    let cohort_end = years_before(p.end_date, 1);
                    Ok(CohortQuery::new(p.end_date)
                        .with(CohortFilter::ArtStartBetween(cohort_start, cohort_end)))
                },
            ),
        ),
        IndicatorDefinition::new(
            "vl_coverage",
            "Viral load coverage",
            "Active patients on ART for at least six months with a viral \
             load test in the last twelve months",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(eligible_for_vl(p, params)
                        .with(CohortFilter::VlTestBetween(years_before(p.end_date, 1), p.end_date)))
                },
                |p, params| Ok(eligible_for_vl(p, params)),
            ),
        ),
        IndicatorDefinition::new(
            "vl_suppression",
            "Viral load suppression",
            "Suppressed results among patients tested in the last twelve months",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(active_on_art(p.end_date, p.end_date, params)
                        .with(CohortFilter::VlTestBetween(years_before(p.end_date, 1), p.end_date))
                        .with(CohortFilter::VlResultBelow(params.vl_suppression_threshold)))
                },
                |p, params| {
                    Ok(active_on_art(p.end_date, p.end_date, params)
                        .with(CohortFilter::VlTestBetween(years_before(p.end_date, 1), p.end_date)))
                },
            ),
        ),
        IndicatorDefinition::new(
            "tld_uptake",
            "TLD uptake",
            "Active patients on the TLD regimen",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(active_on_art(p.end_date, p.end_date, params)
                        .with(CohortFilter::RegimenFormulaIs(params.tld_regimen_formula.clone())))
                },
                |p, params| Ok(active_on_art(p.end_date, p.end_date, params)),
            ),
        ),
        IndicatorDefinition::new(
            "mmd_3m",
            "Multi-month dispensing",
            "MMD-eligible active patients whose latest dispense covered the \
             multi-month threshold",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(active_on_art(p.end_date, p.end_date, params)
                        .with(CohortFilter::CareModelIs(params.mmd_eligible_code.clone()))
                        .with(CohortFilter::LastDispenseDaysAtLeast(
                            params.mmd_min_dispense_days,
                        )))
                },
                |p, params| {
                    Ok(active_on_art(p.end_date, p.end_date, params)
                        .with(CohortFilter::CareModelIs(params.mmd_eligible_code.clone())))
                },
            ),
        ),
        IndicatorDefinition::new(
            "tpt_initiation",
            "TPT initiation",
            "Active patients who started TB preventive therapy during the period",
            CohortIndicator::ratio(
                |p, params| {
                    Ok(active_on_art(p.end_date, p.end_date, params)
                        .with(CohortFilter::TptDrugIn(params.tpt_drug_list.clone()))
                        .with(CohortFilter::TptStartBetween(p.start_date, p.end_date)))
                },
                |p, params| Ok(active_on_art(p.end_date, p.end_date, params)),
            ),
        ),
        IndicatorDefinition::new(
            "same_day_art_initiation",
            "Same-day ART initiation",
            "New initiations starting ART on their enrollment day",
            CohortIndicator::ratio(
                |p, _| {
                    Ok(CohortQuery::new(p.end_date)
                        .with(CohortFilter::ArtStartBetween(p.start_date, p.end_date))
                        .with(CohortFilter::DaysToArtStartAtMost(0)))
                },
                |p, _| {
                    Ok(CohortQuery::new(p.end_date)
                        .with(CohortFilter::ArtStartBetween(p.start_date, p.end_date)))
                },
            ),
        ),
    ]
}

/// Active patients eligible for a viral load test: on ART for six months
/// or more at period end.
fn eligible_for_vl(p: &ReportingPeriod, params: &IndicatorParams) -> CohortQuery {
    active_on_art(p.end_date, p.end_date, params)
        .with(CohortFilter::ArtStartOnOrBefore(months_before(p.end_date, 6)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::catalog::IndicatorCompute;

    #[test]
    fn test_ids_unique_and_stable() {
        let defs = builtin_definitions();
        let mut ids: Vec<_> = defs.iter().map(|d| d.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), defs.len());
        assert!(ids.contains(&"tx_curr".to_string()));
        assert!(ids.contains(&"vl_suppression".to_string()));
    }

    #[test]
    fn test_every_definition_builds_queries() {
        let period = ReportingPeriod::quarterly(2025, 2).unwrap();
        let params = IndicatorParams::default();
        for def in builtin_definitions() {
            let num = def.compute.numerator(&period, &params).unwrap();
            assert!(!num.filters.is_empty(), "{} numerator empty", def.id);
            // denominator, where present, must also build
            def.compute.denominator(&period, &params).unwrap();
        }
    }

    #[test]
    fn test_mortality_denominator_uses_previous_period_end() {
        let period = ReportingPeriod::quarterly(2025, 2).unwrap();
        let params = IndicatorParams::default();
        let defs = builtin_definitions();
        let dead = defs.iter().find(|d| d.id == "tx_ml_dead").unwrap();
        let den = dead.compute.denominator(&period, &params).unwrap().unwrap();
        assert!(den.filters.contains(&CohortFilter::ArtStartOnOrBefore(
            period.previous_end_date
        )));
    }
}
