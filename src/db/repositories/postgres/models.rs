use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{indicator_cache, indicator_flags, sites};
use super::site_schema::patient_summary;
use crate::api::PatientRow;
use crate::db::registry::{Site, SiteStatus};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sites)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[allow(dead_code)] // updated_at used only for database operations
pub struct SiteRow {
    pub code: String,
    pub display_name: String,
    pub database_name: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<SiteRow> for Site {
    fn from(row: SiteRow) -> Self {
        Site {
            code: row.code,
            display_name: row.display_name,
            database_name: row.database_name,
            status: if row.is_active {
                SiteStatus::Active
            } else {
                SiteStatus::Inactive
            },
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = indicator_cache)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CacheRow {
    pub indicator_id: String,
    pub site_code: String,
    pub period_type: String,
    pub period_year: i32,
    pub period_index: i32,
    pub result: Value,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = indicator_cache)]
pub struct NewCacheRow {
    pub indicator_id: String,
    pub site_code: String,
    pub period_type: String,
    pub period_year: i32,
    pub period_index: i32,
    pub result: Value,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = indicator_flags)]
#[allow(dead_code)] // updated_at used only for database operations
pub struct FlagRow {
    pub indicator_id: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = indicator_flags)]
pub struct NewFlagRow {
    pub indicator_id: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = patient_summary)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PatientSummaryRow {
    pub patient_id: String,
    pub full_name: String,
    pub sex: String,
    pub birth_date: NaiveDate,
    pub art_start_date: Option<NaiveDate>,
    pub status_code: String,
    pub last_vl_result: Option<i32>,
}

impl From<PatientSummaryRow> for PatientRow {
    fn from(row: PatientSummaryRow) -> Self {
        PatientRow {
            patient_id: row.patient_id,
            full_name: row.full_name,
            sex: row.sex,
            birth_date: row.birth_date,
            art_start_date: row.art_start_date,
            status_code: row.status_code,
            last_vl_result: row.last_vl_result,
        }
    }
}
