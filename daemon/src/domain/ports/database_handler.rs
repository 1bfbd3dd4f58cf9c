//! Driven port for the object store, its journal, and mirroring status.
//!
//! Every mutation happens inside a [`DatabaseTransaction`]. Nothing a run
//! writes is visible to other readers until [`DatabaseTransaction::commit`];
//! dropping a transaction without committing discards it. Journal serials
//! are assigned at commit time so that they stay gapless per source even
//! when several transactions run concurrently.

use async_trait::async_trait;

use crate::domain::{
    ClientStatus, DatabaseStatus, JournalEntry, JournalEntryOrigin, RpslObject, SerialRange,
    ServerStatus,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by database adapters.
    pub enum DatabaseHandlerError {
        /// A connection could not be obtained.
        Connection { message: String } => "database connection failed: {message}",
        /// A query or mutation failed.
        Query { message: String } => "database query failed: {message}",
        /// A stored value could not be decoded.
        Corrupt { message: String } => "database row could not be decoded: {message}",
        /// The transaction was already finished.
        Closed => "database transaction already finished",
    }
}

/// Entry point for reading state and opening transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseHandler: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, DatabaseHandlerError>;

    /// Read the committed status of `source`.
    async fn status_for(&self, source: &str)
    -> Result<Option<DatabaseStatus>, DatabaseHandlerError>;

    /// Read committed journal entries of `source` within `range`, in serial order.
    async fn journal_entries(
        &self,
        source: &str,
        range: SerialRange,
    ) -> Result<Vec<JournalEntry>, DatabaseHandlerError>;

    /// Record a mirroring failure in its own transaction.
    ///
    /// Used after the failing run's transaction has been rolled back, so the
    /// error survives even though the run's changes do not.
    async fn record_mirror_error(
        &self,
        source: &str,
        message: &str,
    ) -> Result<(), DatabaseHandlerError>;
}

/// One unit of work against the database.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Status of `source` as seen by this transaction.
    async fn status_for(
        &mut self,
        source: &str,
    ) -> Result<Option<DatabaseStatus>, DatabaseHandlerError>;

    /// Every object of `source`, ordered by class and primary key.
    async fn objects_for_source(
        &mut self,
        source: &str,
    ) -> Result<Vec<RpslObject>, DatabaseHandlerError>;

    /// Journal entries of `source` within `range`, in serial order.
    async fn journal_entries(
        &mut self,
        source: &str,
        range: SerialRange,
    ) -> Result<Vec<JournalEntry>, DatabaseHandlerError>;

    /// Stop writing journal entries for subsequent mutations.
    fn disable_journaling(&mut self);

    /// Resume writing journal entries.
    fn enable_journaling(&mut self);

    /// Insert or replace an object.
    async fn upsert_rpsl_object(
        &mut self,
        object: &RpslObject,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
    ) -> Result<(), DatabaseHandlerError>;

    /// Delete one object; returns whether it existed.
    async fn delete_rpsl_object(
        &mut self,
        source: &str,
        object_class: &str,
        pk: &str,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
    ) -> Result<bool, DatabaseHandlerError>;

    /// Delete every object of `source`; returns how many were removed.
    async fn delete_all_rpsl_objects(
        &mut self,
        source: &str,
        origin: JournalEntryOrigin,
    ) -> Result<u64, DatabaseHandlerError>;

    /// Record the newest serial received from an NRTM v3 remote.
    async fn update_serial_newest_mirror(
        &mut self,
        source: &str,
        serial: u64,
    ) -> Result<(), DatabaseHandlerError>;

    /// Set or clear the force-reload flag.
    async fn set_force_reload(
        &mut self,
        source: &str,
        force_reload: bool,
    ) -> Result<(), DatabaseHandlerError>;

    /// Clear the last recorded mirroring error.
    async fn clear_mirror_error(&mut self, source: &str) -> Result<(), DatabaseHandlerError>;

    /// Replace the NRTM v4 client status; `None` removes it.
    async fn update_client_status(
        &mut self,
        source: &str,
        status: Option<&ClientStatus>,
    ) -> Result<(), DatabaseHandlerError>;

    /// Replace the NRTM v4 server status; `None` removes it.
    async fn update_server_status(
        &mut self,
        source: &str,
        status: Option<&ServerStatus>,
    ) -> Result<(), DatabaseHandlerError>;

    /// Make every change visible atomically.
    async fn commit(self: Box<Self>) -> Result<(), DatabaseHandlerError>;

    /// Discard every change.
    async fn rollback(self: Box<Self>) -> Result<(), DatabaseHandlerError>;
}
