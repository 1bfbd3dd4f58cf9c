//! Diesel row structs and their conversion to domain types.
//!
//! These stay inside the persistence adapter.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::ports::DatabaseHandlerError;
use crate::domain::{DatabaseStatus, JournalEntry, RpslObject};

use super::schema::{database_status, rpsl_database_journal, rpsl_objects};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = rpsl_objects)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(super) struct RpslObjectRow {
    pub source: String,
    pub object_class: String,
    pub rpsl_pk: String,
    pub object_text: String,
}

impl From<RpslObjectRow> for RpslObject {
    fn from(row: RpslObjectRow) -> Self {
        Self {
            object_class: row.object_class,
            pk: row.rpsl_pk,
            source: row.source,
            text: row.object_text,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = rpsl_objects)]
pub(super) struct NewRpslObjectRow<'a> {
    pub source: &'a str,
    pub object_class: &'a str,
    pub rpsl_pk: &'a str,
    pub object_text: &'a str,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = rpsl_database_journal)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(super) struct JournalRow {
    pub source: String,
    pub serial_global: i64,
    pub serial_nrtm: Option<i64>,
    pub operation: String,
    pub object_class: String,
    pub rpsl_pk: String,
    pub object_text: String,
    pub origin: String,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = DatabaseHandlerError;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        Ok(Self {
            serial_global: from_db_serial(row.serial_global)?,
            serial_nrtm: row.serial_nrtm.map(from_db_serial).transpose()?,
            operation: row.operation.parse().map_err(DatabaseHandlerError::corrupt)?,
            origin: row.origin.parse().map_err(DatabaseHandlerError::corrupt)?,
            source: row.source,
            object_class: row.object_class,
            rpsl_pk: row.rpsl_pk,
            object_text: row.object_text,
            timestamp: row.timestamp,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = rpsl_database_journal)]
pub(super) struct NewJournalRow<'a> {
    pub source: &'a str,
    pub serial_global: i64,
    pub serial_nrtm: Option<i64>,
    pub operation: &'static str,
    pub object_class: &'a str,
    pub rpsl_pk: &'a str,
    pub object_text: &'a str,
    pub origin: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = database_status)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(super) struct DatabaseStatusRow {
    pub source: String,
    pub serial_oldest_journal: Option<i64>,
    pub serial_newest_journal: Option<i64>,
    pub serial_newest_mirror: Option<i64>,
    pub force_reload: bool,
    pub last_error: Option<String>,
    pub last_error_timestamp: Option<DateTime<Utc>>,
    pub nrtm4_client_status: Option<Value>,
    pub nrtm4_server_status: Option<Value>,
    pub updated: DateTime<Utc>,
}

impl TryFrom<DatabaseStatusRow> for DatabaseStatus {
    type Error = DatabaseHandlerError;

    fn try_from(row: DatabaseStatusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            serial_oldest_journal: row.serial_oldest_journal.map(from_db_serial).transpose()?,
            serial_newest_journal: row.serial_newest_journal.map(from_db_serial).transpose()?,
            serial_newest_mirror: row.serial_newest_mirror.map(from_db_serial).transpose()?,
            force_reload: row.force_reload,
            last_error: row.last_error,
            last_error_timestamp: row.last_error_timestamp,
            nrtm4_client: row.nrtm4_client_status.map(from_json).transpose()?,
            nrtm4_server: row.nrtm4_server_status.map(from_json).transpose()?,
            updated: row.updated,
            source: row.source,
        })
    }
}

pub(super) fn from_db_serial(value: i64) -> Result<u64, DatabaseHandlerError> {
    u64::try_from(value)
        .map_err(|_| DatabaseHandlerError::corrupt(format!("negative serial {value}")))
}

pub(super) fn to_db_serial(value: u64) -> Result<i64, DatabaseHandlerError> {
    i64::try_from(value)
        .map_err(|_| DatabaseHandlerError::query(format!("serial {value} exceeds BIGINT")))
}

fn from_json<T: DeserializeOwned>(value: Value) -> Result<T, DatabaseHandlerError> {
    serde_json::from_value(value).map_err(|err| DatabaseHandlerError::corrupt(err.to_string()))
}

pub(super) fn to_json<T: Serialize>(value: &T) -> Result<Value, DatabaseHandlerError> {
    serde_json::to_value(value).map_err(|err| DatabaseHandlerError::query(err.to_string()))
}
