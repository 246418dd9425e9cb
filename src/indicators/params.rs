//! Clinically-configurable indicator parameters.
//!
//! Program-specific constants (which status codes mean "dead" vs "lost",
//! which drug list constitutes TPT, the viral-load suppression threshold)
//! are supplied here as typed values and injected into cohort queries as
//! bind parameters. Indicator logic never hard-codes them.

use serde::{Deserialize, Serialize};

/// Parameters passed through to every indicator computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    /// Status code for patients lost to follow-up.
    #[serde(default = "default_lost_code")]
    pub lost_code: String,
    /// Status code for deceased patients.
    #[serde(default = "default_dead_code")]
    pub dead_code: String,
    /// Status code for patients transferred out to another site.
    #[serde(default = "default_transfer_out_code")]
    pub transfer_out_code: String,
    /// Status code for patients transferred in from another site.
    #[serde(default = "default_transfer_in_code")]
    pub transfer_in_code: String,
    /// Care-model code marking patients eligible for multi-month dispensing.
    #[serde(default = "default_mmd_eligible_code")]
    pub mmd_eligible_code: String,
    /// Minimum dispensed days of ARVs to count as multi-month dispensing.
    #[serde(default = "default_mmd_min_dispense_days")]
    pub mmd_min_dispense_days: i32,
    /// Viral load below this many copies/mL counts as suppressed.
    #[serde(default = "default_vl_suppression_threshold")]
    pub vl_suppression_threshold: i32,
    /// Regimen formula string identifying TLD.
    #[serde(default = "default_tld_regimen_formula")]
    pub tld_regimen_formula: String,
    /// Drug names that constitute TB preventive therapy.
    #[serde(default = "default_tpt_drug_list")]
    pub tpt_drug_list: Vec<String>,
}

fn default_lost_code() -> String {
    "LTFU".to_string()
}

fn default_dead_code() -> String {
    "DEAD".to_string()
}

fn default_transfer_out_code() -> String {
    "TRANSFER_OUT".to_string()
}

fn default_transfer_in_code() -> String {
    "TRANSFER_IN".to_string()
}

fn default_mmd_eligible_code() -> String {
    "DSD_MMD".to_string()
}

fn default_mmd_min_dispense_days() -> i32 {
    90
}

fn default_vl_suppression_threshold() -> i32 {
    1000
}

fn default_tld_regimen_formula() -> String {
    "TDF/3TC/DTG".to_string()
}

fn default_tpt_drug_list() -> Vec<String> {
    vec![
        "Isoniazid".to_string(),
        "Isoniazid/Rifapentine".to_string(),
        "Isoniazid/Rifampicin".to_string(),
    ]
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            lost_code: default_lost_code(),
            dead_code: default_dead_code(),
            transfer_out_code: default_transfer_out_code(),
            transfer_in_code: default_transfer_in_code(),
            mmd_eligible_code: default_mmd_eligible_code(),
            mmd_min_dispense_days: default_mmd_min_dispense_days(),
            vl_suppression_threshold: default_vl_suppression_threshold(),
            tld_regimen_formula: default_tld_regimen_formula(),
            tpt_drug_list: default_tpt_drug_list(),
        }
    }
}

impl IndicatorParams {
    /// Status codes that remove a patient from the active cohort.
    pub fn exit_codes(&self) -> Vec<String> {
        vec![
            self.dead_code.clone(),
            self.lost_code.clone(),
            self.transfer_out_code.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let params: IndicatorParams = toml::from_str("vl_suppression_threshold = 50").unwrap();
        assert_eq!(params.vl_suppression_threshold, 50);
        assert_eq!(params.lost_code, "LTFU");
        assert_eq!(params.mmd_min_dispense_days, 90);
        assert_eq!(params.tpt_drug_list.len(), 3);
    }

    #[test]
    fn test_exit_codes() {
        let params = IndicatorParams::default();
        let codes = params.exit_codes();
        assert!(codes.contains(&"DEAD".to_string()));
        assert!(codes.contains(&"LTFU".to_string()));
        assert!(codes.contains(&"TRANSFER_OUT".to_string()));
    }
}
