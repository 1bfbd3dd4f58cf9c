//! PostgreSQL-backed [`DatabaseHandler`] using Diesel.
//!
//! Each transaction owns a pooled connection for its whole lifetime. Object
//! and status writes go straight to the connection; journal entries are
//! buffered and only receive serials at commit, while the journal table is
//! locked in `EXCLUSIVE` mode. Concurrent writers therefore serialise only
//! for the short moment of appending their entries, and serials stay gapless
//! per source.
//!
//! A transaction dropped without commit or rollback returns its connection
//! mid-transaction; the pool discards such connections instead of reusing
//! them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use mockable::Clock;
use tracing::debug;

use crate::domain::ports::{DatabaseHandler, DatabaseHandlerError, DatabaseTransaction};
use crate::domain::{
    ClientStatus, DatabaseOperation, DatabaseStatus, JournalEntry, JournalEntryOrigin,
    RpslObject, SerialRange, ServerStatus,
};

use super::error_mapping::{map_diesel_error, map_pool_error};
use super::models::{
    DatabaseStatusRow, JournalRow, NewJournalRow, NewRpslObjectRow, RpslObjectRow, from_db_serial,
    to_db_serial, to_json,
};
use super::pool::{DbPool, OwnedConnection};
use super::schema::{database_status, rpsl_database_journal, rpsl_objects};

/// Rows per journal `INSERT`, keeping well under the bind parameter limit.
const JOURNAL_INSERT_CHUNK: usize = 1000;

type Transactions = AnsiTransactionManager;

/// Diesel implementation of the [`DatabaseHandler`] port.
#[derive(Clone)]
pub struct DieselDatabaseHandler {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselDatabaseHandler {
    /// Create a handler over `pool`, timestamping rows with `clock`.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

async fn load_status(
    conn: &mut AsyncPgConnection,
    source: &str,
) -> Result<Option<DatabaseStatus>, DatabaseHandlerError> {
    let row: Option<DatabaseStatusRow> = database_status::table
        .find(source)
        .select(DatabaseStatusRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, "load status"))?;
    row.map(DatabaseStatus::try_from).transpose()
}

async fn load_journal(
    conn: &mut AsyncPgConnection,
    source: &str,
    range: SerialRange,
) -> Result<Vec<JournalEntry>, DatabaseHandlerError> {
    let mut query = rpsl_database_journal::table
        .filter(rpsl_database_journal::source.eq(source))
        .filter(rpsl_database_journal::serial_global.ge(to_db_serial(range.start)?))
        .into_boxed();
    if let Some(end) = range.end {
        query = query.filter(rpsl_database_journal::serial_global.le(to_db_serial(end)?));
    }
    let rows: Vec<JournalRow> = query
        .order(rpsl_database_journal::serial_global.asc())
        .select(JournalRow::as_select())
        .load(conn)
        .await
        .map_err(|err| map_diesel_error(err, "load journal"))?;
    rows.into_iter().map(JournalEntry::try_from).collect()
}

async fn ensure_status_row(
    conn: &mut AsyncPgConnection,
    source: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseHandlerError> {
    diesel::insert_into(database_status::table)
        .values((
            database_status::source.eq(source),
            database_status::updated.eq(now),
        ))
        .on_conflict(database_status::source)
        .do_nothing()
        .execute(conn)
        .await
        .map_err(|err| map_diesel_error(err, "create status"))?;
    Ok(())
}

#[async_trait]
impl DatabaseHandler for DieselDatabaseHandler {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, DatabaseHandlerError> {
        let mut conn = self.pool.get_owned().await.map_err(map_pool_error)?;
        <Transactions as TransactionManager<AsyncPgConnection>>::begin_transaction(&mut *conn)
            .await
            .map_err(|err| map_diesel_error(err, "begin"))?;
        Ok(Box::new(DieselTransaction {
            conn,
            clock: Arc::clone(&self.clock),
            journaling: true,
            pending: Vec::new(),
        }))
    }

    async fn status_for(
        &self,
        source: &str,
    ) -> Result<Option<DatabaseStatus>, DatabaseHandlerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        load_status(&mut conn, source).await
    }

    async fn journal_entries(
        &self,
        source: &str,
        range: SerialRange,
    ) -> Result<Vec<JournalEntry>, DatabaseHandlerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        load_journal(&mut conn, source, range).await
    }

    async fn record_mirror_error(
        &self,
        source: &str,
        message: &str,
    ) -> Result<(), DatabaseHandlerError> {
        let now = self.clock.utc();
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(database_status::table)
            .values((
                database_status::source.eq(source),
                database_status::last_error.eq(message),
                database_status::last_error_timestamp.eq(now),
                database_status::updated.eq(now),
            ))
            .on_conflict(database_status::source)
            .do_update()
            .set((
                database_status::last_error.eq(message),
                database_status::last_error_timestamp.eq(now),
                database_status::updated.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "record mirror error"))?;
        Ok(())
    }
}

/// Journal entry waiting for its serial.
#[derive(Debug)]
struct PendingJournal {
    source: String,
    serial_nrtm: Option<u64>,
    operation: DatabaseOperation,
    object_class: String,
    rpsl_pk: String,
    object_text: String,
    origin: JournalEntryOrigin,
    timestamp: DateTime<Utc>,
}

/// One Diesel transaction on an owned connection.
pub struct DieselTransaction {
    conn: OwnedConnection,
    clock: Arc<dyn Clock>,
    journaling: bool,
    pending: Vec<PendingJournal>,
}

impl DieselTransaction {
    fn conn(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }

    fn journal(
        &mut self,
        operation: DatabaseOperation,
        object: RpslObject,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
    ) {
        if !self.journaling {
            return;
        }
        self.pending.push(PendingJournal {
            source: object.source,
            serial_nrtm,
            operation,
            object_class: object.object_class,
            rpsl_pk: object.pk,
            object_text: object.text,
            origin,
            timestamp: self.clock.utc(),
        });
    }

    async fn touch_status(&mut self, source: &str) -> Result<DateTime<Utc>, DatabaseHandlerError> {
        let now = self.clock.utc();
        ensure_status_row(self.conn(), source, now).await?;
        Ok(now)
    }

    /// Assign serials to buffered journal entries and write them.
    async fn flush_journal(&mut self) -> Result<(), DatabaseHandlerError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        diesel::sql_query("LOCK TABLE rpsl_database_journal IN EXCLUSIVE MODE")
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "lock journal"))?;

        let pending = std::mem::take(&mut self.pending);
        let mut sources: Vec<&str> = Vec::new();
        for entry in &pending {
            if !sources.contains(&entry.source.as_str()) {
                sources.push(&entry.source);
            }
        }
        for source in sources {
            let entries: Vec<&PendingJournal> =
                pending.iter().filter(|entry| entry.source == source).collect();
            self.append_journal(source, &entries).await?;
        }
        Ok(())
    }

    async fn append_journal(
        &mut self,
        source: &str,
        entries: &[&PendingJournal],
    ) -> Result<(), DatabaseHandlerError> {
        let now = self.touch_status(source).await?;
        let (oldest, newest): (Option<i64>, Option<i64>) = database_status::table
            .find(source)
            .select((
                database_status::serial_oldest_journal,
                database_status::serial_newest_journal,
            ))
            .first(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "read journal serials"))?;
        let journal_max: Option<i64> = rpsl_database_journal::table
            .filter(rpsl_database_journal::source.eq(source))
            .select(max(rpsl_database_journal::serial_global))
            .first(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "read journal serials"))?;
        let previous = newest.max(journal_max).map(from_db_serial).transpose()?;
        let first = previous.map_or(1, |serial| serial + 1);

        let mut rows = Vec::with_capacity(entries.len());
        for (serial, entry) in (first..).zip(entries) {
            rows.push(NewJournalRow {
                source,
                serial_global: to_db_serial(serial)?,
                serial_nrtm: entry.serial_nrtm.map(to_db_serial).transpose()?,
                operation: entry.operation.as_str(),
                object_class: &entry.object_class,
                rpsl_pk: &entry.rpsl_pk,
                object_text: &entry.object_text,
                origin: entry.origin.as_str(),
                timestamp: entry.timestamp,
            });
        }
        for chunk in rows.chunks(JOURNAL_INSERT_CHUNK) {
            diesel::insert_into(rpsl_database_journal::table)
                .values(chunk)
                .execute(self.conn())
                .await
                .map_err(|err| map_diesel_error(err, "append journal"))?;
        }

        let count = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        let last = to_db_serial(first + count - 1)?;
        let oldest = oldest.unwrap_or(to_db_serial(first)?);
        diesel::update(database_status::table.find(source))
            .set((
                database_status::serial_oldest_journal.eq(Some(oldest)),
                database_status::serial_newest_journal.eq(Some(last)),
                database_status::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "update journal serials"))?;
        debug!(source, first, last, "journal entries appended");
        Ok(())
    }
}

#[async_trait]
impl DatabaseTransaction for DieselTransaction {
    async fn status_for(
        &mut self,
        source: &str,
    ) -> Result<Option<DatabaseStatus>, DatabaseHandlerError> {
        load_status(self.conn(), source).await
    }

    async fn objects_for_source(
        &mut self,
        source: &str,
    ) -> Result<Vec<RpslObject>, DatabaseHandlerError> {
        let rows: Vec<RpslObjectRow> = rpsl_objects::table
            .filter(rpsl_objects::source.eq(source))
            .order((rpsl_objects::object_class.asc(), rpsl_objects::rpsl_pk.asc()))
            .select(RpslObjectRow::as_select())
            .load(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "load objects"))?;
        Ok(rows.into_iter().map(RpslObject::from).collect())
    }

    async fn journal_entries(
        &mut self,
        source: &str,
        range: SerialRange,
    ) -> Result<Vec<JournalEntry>, DatabaseHandlerError> {
        load_journal(self.conn(), source, range).await
    }

    fn disable_journaling(&mut self) {
        self.journaling = false;
    }

    fn enable_journaling(&mut self) {
        self.journaling = true;
    }

    async fn upsert_rpsl_object(
        &mut self,
        object: &RpslObject,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
    ) -> Result<(), DatabaseHandlerError> {
        let now = self.clock.utc();
        diesel::insert_into(rpsl_objects::table)
            .values(NewRpslObjectRow {
                source: &object.source,
                object_class: &object.object_class,
                rpsl_pk: &object.pk,
                object_text: &object.text,
                updated: now,
            })
            .on_conflict((
                rpsl_objects::source,
                rpsl_objects::object_class,
                rpsl_objects::rpsl_pk,
            ))
            .do_update()
            .set((
                rpsl_objects::object_text.eq(excluded(rpsl_objects::object_text)),
                rpsl_objects::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "upsert object"))?;
        self.journal(
            DatabaseOperation::AddOrUpdate,
            object.clone(),
            origin,
            serial_nrtm,
        );
        Ok(())
    }

    async fn delete_rpsl_object(
        &mut self,
        source: &str,
        object_class: &str,
        pk: &str,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
    ) -> Result<bool, DatabaseHandlerError> {
        let removed: Option<RpslObjectRow> = diesel::delete(
            rpsl_objects::table
                .filter(rpsl_objects::source.eq(source))
                .filter(rpsl_objects::object_class.eq(object_class))
                .filter(rpsl_objects::rpsl_pk.eq(pk)),
        )
        .returning(RpslObjectRow::as_returning())
        .get_result(self.conn())
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, "delete object"))?;
        let Some(row) = removed else {
            return Ok(false);
        };
        self.journal(DatabaseOperation::Delete, row.into(), origin, serial_nrtm);
        Ok(true)
    }

    async fn delete_all_rpsl_objects(
        &mut self,
        source: &str,
        origin: JournalEntryOrigin,
    ) -> Result<u64, DatabaseHandlerError> {
        let removed: Vec<RpslObjectRow> =
            diesel::delete(rpsl_objects::table.filter(rpsl_objects::source.eq(source)))
                .returning(RpslObjectRow::as_returning())
                .get_results(self.conn())
                .await
                .map_err(|err| map_diesel_error(err, "delete all objects"))?;
        let count = u64::try_from(removed.len()).unwrap_or(u64::MAX);
        for row in removed {
            self.journal(DatabaseOperation::Delete, row.into(), origin, None);
        }
        Ok(count)
    }

    async fn update_serial_newest_mirror(
        &mut self,
        source: &str,
        serial: u64,
    ) -> Result<(), DatabaseHandlerError> {
        let now = self.touch_status(source).await?;
        let serial = to_db_serial(serial)?;
        diesel::update(database_status::table.find(source))
            .set((
                database_status::serial_newest_mirror.eq(Some(serial)),
                database_status::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "update mirror serial"))?;
        Ok(())
    }

    async fn set_force_reload(
        &mut self,
        source: &str,
        force_reload: bool,
    ) -> Result<(), DatabaseHandlerError> {
        let now = self.touch_status(source).await?;
        diesel::update(database_status::table.find(source))
            .set((
                database_status::force_reload.eq(force_reload),
                database_status::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "set force reload"))?;
        Ok(())
    }

    async fn clear_mirror_error(&mut self, source: &str) -> Result<(), DatabaseHandlerError> {
        let now = self.touch_status(source).await?;
        diesel::update(database_status::table.find(source))
            .set((
                database_status::last_error.eq(None::<String>),
                database_status::last_error_timestamp.eq(None::<DateTime<Utc>>),
                database_status::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "clear mirror error"))?;
        Ok(())
    }

    async fn update_client_status(
        &mut self,
        source: &str,
        status: Option<&ClientStatus>,
    ) -> Result<(), DatabaseHandlerError> {
        let value = status.map(to_json).transpose()?;
        let now = self.touch_status(source).await?;
        diesel::update(database_status::table.find(source))
            .set((
                database_status::nrtm4_client_status.eq(value),
                database_status::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "update client status"))?;
        Ok(())
    }

    async fn update_server_status(
        &mut self,
        source: &str,
        status: Option<&ServerStatus>,
    ) -> Result<(), DatabaseHandlerError> {
        let value = status.map(to_json).transpose()?;
        let now = self.touch_status(source).await?;
        diesel::update(database_status::table.find(source))
            .set((
                database_status::nrtm4_server_status.eq(value),
                database_status::updated.eq(now),
            ))
            .execute(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "update server status"))?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DatabaseHandlerError> {
        self.flush_journal().await?;
        <Transactions as TransactionManager<AsyncPgConnection>>::commit_transaction(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "commit"))
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DatabaseHandlerError> {
        self.pending.clear();
        <Transactions as TransactionManager<AsyncPgConnection>>::rollback_transaction(self.conn())
            .await
            .map_err(|err| map_diesel_error(err, "rollback"))
    }
}
