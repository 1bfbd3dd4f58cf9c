//! In-process database adapter.
//!
//! Each transaction works on a private copy of the committed state and logs
//! its writes. Commit replays the log against the shared state while holding
//! its lock, which is also when journal serials are assigned, so serials
//! stay gapless per source under any number of concurrent transactions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;

use crate::domain::ports::{DatabaseHandler, DatabaseHandlerError, DatabaseTransaction};
use crate::domain::{
    ClientStatus, DatabaseStatus, JournalEntry, JournalEntryOrigin,
    RpslObject, SerialRange, ServerStatus,
};

mod state;

use state::{MemoryState, PendingWrite};

/// Thread-safe in-memory implementation of [`DatabaseHandler`].
#[derive(Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDatabase {
    /// Empty database timestamping changes with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    /// Committed objects of `source`.
    #[must_use]
    pub fn objects(&self, source: &str) -> Vec<RpslObject> {
        lock(&self.state).objects_for_source(source)
    }

    /// Committed journal of `source`.
    #[must_use]
    pub fn journal(&self, source: &str) -> Vec<JournalEntry> {
        lock(&self.state).journal_entries(source, SerialRange::from(0))
    }

    /// Committed status of `source`.
    #[must_use]
    pub fn status(&self, source: &str) -> Option<DatabaseStatus> {
        lock(&self.state).statuses.get(source).cloned()
    }
}

#[async_trait]
impl DatabaseHandler for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, DatabaseHandlerError> {
        let view = lock(&self.state).clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            view,
            writes: Vec::new(),
            journaling: true,
            clock: Arc::clone(&self.clock),
        }))
    }

    async fn status_for(
        &self,
        source: &str,
    ) -> Result<Option<DatabaseStatus>, DatabaseHandlerError> {
        Ok(self.status(source))
    }

    async fn journal_entries(
        &self,
        source: &str,
        range: SerialRange,
    ) -> Result<Vec<JournalEntry>, DatabaseHandlerError> {
        Ok(lock(&self.state).journal_entries(source, range))
    }

    async fn record_mirror_error(
        &self,
        source: &str,
        message: &str,
    ) -> Result<(), DatabaseHandlerError> {
        let now = self.clock.utc();
        let mut state = lock(&self.state);
        let status = state.status_mut(source, now);
        status.last_error = Some(message.to_owned());
        status.last_error_timestamp = Some(now);
        Ok(())
    }
}

/// Transaction over a private copy of the state.
pub struct MemoryTransaction {
    shared: Arc<Mutex<MemoryState>>,
    view: MemoryState,
    writes: Vec<PendingWrite>,
    journaling: bool,
    clock: Arc<dyn Clock>,
}

impl MemoryTransaction {
    fn record(&mut self, write: PendingWrite) -> bool {
        let now = self.now();
        let changed = self.view.apply(&write, now);
        self.writes.push(write);
        changed
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn status_for(
        &mut self,
        source: &str,
    ) -> Result<Option<DatabaseStatus>, DatabaseHandlerError> {
        Ok(self.view.statuses.get(source).cloned())
    }

    async fn objects_for_source(
        &mut self,
        source: &str,
    ) -> Result<Vec<RpslObject>, DatabaseHandlerError> {
        Ok(self.view.objects_for_source(source))
    }

    async fn journal_entries(
        &mut self,
        source: &str,
        range: SerialRange,
    ) -> Result<Vec<JournalEntry>, DatabaseHandlerError> {
        Ok(self.view.journal_entries(source, range))
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
        self.record(PendingWrite::Upsert {
            object: object.clone(),
            origin,
            serial_nrtm,
            journaled: self.journaling,
        });
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
        Ok(self.record(PendingWrite::Delete {
            source: source.to_owned(),
            object_class: object_class.to_owned(),
            pk: pk.to_owned(),
            origin,
            serial_nrtm,
            journaled: self.journaling,
        }))
    }

    async fn delete_all_rpsl_objects(
        &mut self,
        source: &str,
        origin: JournalEntryOrigin,
    ) -> Result<u64, DatabaseHandlerError> {
        let existing = self.view.objects_for_source(source).len();
        self.record(PendingWrite::DeleteAll {
            source: source.to_owned(),
            origin,
            journaled: self.journaling,
        });
        Ok(u64::try_from(existing).unwrap_or(u64::MAX))
    }

    async fn update_serial_newest_mirror(
        &mut self,
        source: &str,
        serial: u64,
    ) -> Result<(), DatabaseHandlerError> {
        self.record(PendingWrite::MirrorSerial {
            source: source.to_owned(),
            serial,
        });
        Ok(())
    }

    async fn set_force_reload(
        &mut self,
        source: &str,
        force_reload: bool,
    ) -> Result<(), DatabaseHandlerError> {
        self.record(PendingWrite::ForceReload {
            source: source.to_owned(),
            force_reload,
        });
        Ok(())
    }

    async fn clear_mirror_error(&mut self, source: &str) -> Result<(), DatabaseHandlerError> {
        self.record(PendingWrite::ClearError {
            source: source.to_owned(),
        });
        Ok(())
    }

    async fn update_client_status(
        &mut self,
        source: &str,
        status: Option<&ClientStatus>,
    ) -> Result<(), DatabaseHandlerError> {
        self.record(PendingWrite::Client {
            source: source.to_owned(),
            status: status.cloned(),
        });
        Ok(())
    }

    async fn update_server_status(
        &mut self,
        source: &str,
        status: Option<&ServerStatus>,
    ) -> Result<(), DatabaseHandlerError> {
        self.record(PendingWrite::Server {
            source: source.to_owned(),
            status: status.cloned(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseHandlerError> {
        let now = self.now();
        let mut state = lock(&self.shared);
        for write in &self.writes {
            state.apply(write, now);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseHandlerError> {
        Ok(())
    }
}
