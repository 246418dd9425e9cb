// Administrative database tables.

diesel::table! {
    sites (code) {
        code -> Text,
        display_name -> Text,
        database_name -> Text,
        is_active -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    indicator_cache (indicator_id, site_code, period_type, period_year, period_index) {
        indicator_id -> Text,
        site_code -> Text,
        period_type -> Text,
        period_year -> Int4,
        period_index -> Int4,
        result -> Jsonb,
        computed_at -> Timestamptz,
    }
}

diesel::table! {
    indicator_flags (indicator_id) {
        indicator_id -> Text,
        is_active -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(indicator_cache, indicator_flags, sites);
