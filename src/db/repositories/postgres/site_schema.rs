// Flat reporting view present in every site database. One row per
// patient, refreshed by the site ETL; this crate only reads it.

diesel::table! {
    patient_summary (patient_id) {
        patient_id -> Text,
        full_name -> Text,
        sex -> Text,
        birth_date -> Date,
        enrollment_date -> Date,
        art_start_date -> Nullable<Date>,
        days_enrollment_to_art -> Nullable<Int4>,
        status_code -> Text,
        status_date -> Date,
        return_to_care_date -> Nullable<Date>,
        transfer_in_date -> Nullable<Date>,
        last_dispense_date -> Nullable<Date>,
        last_dispense_days -> Nullable<Int4>,
        care_model_code -> Nullable<Text>,
        regimen_formula -> Nullable<Text>,
        tpt_drug -> Nullable<Text>,
        tpt_start_date -> Nullable<Date>,
        last_vl_result -> Nullable<Int4>,
        last_vl_date -> Nullable<Date>,
    }
}
