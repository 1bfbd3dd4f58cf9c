//! Diesel table definitions.
//!
//! Must match `migrations/` exactly. Serials are stored as `BIGINT` and
//! converted to `u64` at the model boundary.

diesel::table! {
    /// Current objects of every source.
    rpsl_objects (source, object_class, rpsl_pk) {
        source -> Varchar,
        object_class -> Varchar,
        rpsl_pk -> Varchar,
        object_text -> Text,
        updated -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only change log, keyed by per-source global serial.
    rpsl_database_journal (source, serial_global) {
        source -> Varchar,
        serial_global -> Int8,
        serial_nrtm -> Nullable<Int8>,
        /// `ADD` or `DEL`.
        operation -> Varchar,
        object_class -> Varchar,
        rpsl_pk -> Varchar,
        object_text -> Text,
        /// Journal origin label, for example `mirror`.
        origin -> Varchar,
        timestamp -> Timestamptz,
    }
}

diesel::table! {
    /// Mirroring status, one row per source.
    database_status (source) {
        source -> Varchar,
        serial_oldest_journal -> Nullable<Int8>,
        serial_newest_journal -> Nullable<Int8>,
        serial_newest_mirror -> Nullable<Int8>,
        force_reload -> Bool,
        last_error -> Nullable<Text>,
        last_error_timestamp -> Nullable<Timestamptz>,
        /// Serialised NRTM v4 client state.
        nrtm4_client_status -> Nullable<Jsonb>,
        /// Serialised NRTM v4 server state.
        nrtm4_server_status -> Nullable<Jsonb>,
        updated -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(rpsl_objects, rpsl_database_journal, database_status);
