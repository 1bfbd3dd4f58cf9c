//! NRTM v4 server: publishes a local source as snapshot and delta files
//! plus a signed notification file.
//!
//! A run holds the `nrtm4-server:<SOURCE>` lease for its whole duration. It
//! reads the journal and objects through one transaction, so the files it
//! writes and the status it commits describe the same point in history.
//! Data files are written before the commit; if the commit fails they are
//! left unreferenced and the dangling-file sweep removes them later. The
//! notification file is written only after the commit, so it never refers
//! to a version the status does not record. A notification file older than
//! the recorded signing time is signed again by the next run.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use ed25519_dalek::SigningKey;
use mockable::Clock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::journal::{DatabaseOperation, JournalEntry};
use crate::domain::ports::{DatabaseHandler, DatabaseTransaction, PublicationDirectory};
use crate::domain::rpsl::prepare_for_publication;
use crate::domain::signature::{public_key_to_pem, sign_compact};
use crate::domain::{
    DeltaRecord, LeaseRegistry, MirrorError, Nrtm4ServerConfig, SerialRange, ServerStatus,
    SnapshotRecord, SourceConfig,
};

use super::files::{UNF_FILENAME, data_file_name, is_data_file_name, write_data_file};
use super::types::{
    DataFileHeader, DeltaChange, FileReference, NRTM_VERSION, NrtmFileType, SnapshotObject,
    UpdateNotificationFile,
};

/// Deltas older than this are dropped once a newer snapshot covers them.
pub const DELTA_RETENTION: TimeDelta = TimeDelta::hours(24);
/// The notification file is re-signed at least this often.
pub const UNF_REFRESH: TimeDelta = TimeDelta::hours(8);
/// Unreferenced data files younger than this are left alone.
pub const DANGLING_MIN_AGE: TimeDelta = TimeDelta::hours(1);
/// Allowed gap between the recorded signing time and the notification
/// file's modification time, for file systems with coarse timestamps.
const UNF_MTIME_SLACK: TimeDelta = TimeDelta::seconds(2);

/// Keys used to sign the notification file.
pub struct Nrtm4ServerKeys {
    /// Key signing the notification file.
    pub current: SigningKey,
    /// Key announced as the next signing key.
    pub next: Option<SigningKey>,
}

/// Port bundle required by the NRTM v4 server writer.
#[derive(Clone)]
pub struct Nrtm4ServerPorts {
    /// Object store and journal.
    pub database: Arc<dyn DatabaseHandler>,
    /// Directory files are published into.
    pub directory: Arc<dyn PublicationDirectory>,
    /// Lease registry keeping runs for one source apart.
    pub leases: Arc<LeaseRegistry>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// What a server run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nrtm4ServerOutcome {
    /// Another run holds the lease.
    LeaseHeld,
    /// A force reload is pending for the source.
    ForceReloadPending,
    /// The publication is current.
    Published {
        /// Published session.
        session_id: Uuid,
        /// Published version.
        version: u64,
        /// A delta was written.
        new_delta: bool,
        /// A snapshot was written.
        new_snapshot: bool,
        /// The notification file was re-signed.
        signed: bool,
    },
}

/// A notification file signed inside the run's transaction.
struct SignedNotification {
    version: u64,
    jws: String,
}

/// Work left for after the status change is committed.
struct RunResult {
    outcome: Nrtm4ServerOutcome,
    notification: Option<SignedNotification>,
    expired: Vec<String>,
    referenced: Vec<String>,
}

/// Publishes one source over NRTM v4.
pub struct Nrtm4ServerWriter {
    source: Arc<SourceConfig>,
    config: Nrtm4ServerConfig,
    keys: Nrtm4ServerKeys,
    ports: Nrtm4ServerPorts,
}

impl Nrtm4ServerWriter {
    /// Build a writer for `source`.
    #[must_use]
    pub const fn new(
        source: Arc<SourceConfig>,
        config: Nrtm4ServerConfig,
        keys: Nrtm4ServerKeys,
        ports: Nrtm4ServerPorts,
    ) -> Self {
        Self {
            source,
            config,
            keys,
            ports,
        }
    }

    /// Lease name guarding this source's publication directory.
    #[must_use]
    pub fn lease_name(source: &str) -> String {
        format!("nrtm4-server:{source}")
    }

    /// Run one publication cycle.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] when reading the database, writing files or
    /// signing fails. A failure before the commit leaves the status
    /// unchanged; a failed notification file write after it is repaired by
    /// the next run.
    pub async fn run(&self) -> Result<Nrtm4ServerOutcome, MirrorError> {
        let name = &self.source.name;
        let Some(_lease) = self.ports.leases.try_acquire(&Self::lease_name(name)) else {
            debug!(source = %name, "NRTM v4 server run already in progress; skipping");
            return Ok(Nrtm4ServerOutcome::LeaseHeld);
        };

        let mut txn = self.ports.database.begin().await?;
        let result = match self.run_in(txn.as_mut()).await {
            Ok(result) => result,
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(source = %name, error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        };
        txn.commit().await?;

        if let Some(notification) = &result.notification {
            self.write_notification_file(notification)?;
        }
        for file in &result.expired {
            match self.ports.directory.remove(file) {
                Ok(()) => info!(source = %name, file = %file, "expired delta removed"),
                Err(err) => warn!(source = %name, file = %file, error = %err, "cannot remove expired delta"),
            }
        }
        if !result.referenced.is_empty() {
            self.sweep_dangling(&result.referenced);
        }
        Ok(result.outcome)
    }

    async fn run_in(&self, txn: &mut dyn DatabaseTransaction) -> Result<RunResult, MirrorError> {
        let name = &self.source.name;
        let now = self.ports.clock.utc();
        let status = txn.status_for(name).await?;
        if status.as_ref().is_some_and(|status| status.force_reload) {
            info!(source = %name, "force reload pending; not publishing");
            return Ok(RunResult {
                outcome: Nrtm4ServerOutcome::ForceReloadPending,
                notification: None,
                expired: Vec::new(),
                referenced: Vec::new(),
            });
        }
        let newest_serial = status
            .as_ref()
            .and_then(|status| status.serial_newest_journal)
            .unwrap_or(0);
        let existing = match status.and_then(|status| status.nrtm4_server) {
            Some(existing) if self.files_present(&existing)? => Some(existing),
            Some(existing) => {
                warn!(
                    source = %name,
                    session = %existing.session_id,
                    "published files are missing; starting a new session"
                );
                None
            }
            None => None,
        };

        let mut new_delta = false;
        let mut new_snapshot = false;
        let mut server = match existing {
            None => {
                let session_id = Uuid::new_v4();
                let snapshot = self
                    .write_snapshot(txn, session_id, 1, newest_serial, now)
                    .await?;
                new_snapshot = true;
                info!(source = %name, session = %session_id, "initialised NRTM v4 publication");
                ServerStatus {
                    session_id,
                    version: 1,
                    snapshot,
                    deltas: Vec::new(),
                    unf_timestamp: now,
                }
            }
            Some(mut server) => {
                let start = server.newest_serial() + 1;
                let entries = txn.journal_entries(name, SerialRange::from(start)).await?;
                if let Some(last) = entries.last() {
                    let version = server.version + 1;
                    let serial_end = last.serial_global;
                    let (filename, hash) = self.publish_data_file(
                        NrtmFileType::Delta,
                        server.session_id,
                        version,
                        entries.iter().map(|entry| self.delta_change(entry)),
                    )?;
                    info!(source = %name, version, serial_start = start, serial_end, "delta written");
                    server.version = version;
                    server.deltas.push(DeltaRecord {
                        version,
                        filename,
                        hash,
                        timestamp: now,
                        serial_start: start,
                        serial_end,
                    });
                    new_delta = true;
                }

                let snapshot_due = server.version > server.snapshot.version
                    && now - server.snapshot.timestamp >= self.snapshot_interval();
                if snapshot_due {
                    server.snapshot = self
                        .write_snapshot(
                            txn,
                            server.session_id,
                            server.version,
                            server.newest_serial(),
                            now,
                        )
                        .await?;
                    new_snapshot = true;
                }
                server
            }
        };

        let snapshot_version = server.snapshot.version;
        let (kept, expired): (Vec<DeltaRecord>, Vec<DeltaRecord>) =
            server.deltas.into_iter().partition(|delta| {
                delta.version > snapshot_version || now - delta.timestamp < DELTA_RETENTION
            });
        server.deltas = kept;
        let expired: Vec<String> = expired.into_iter().map(|delta| delta.filename).collect();

        let signed = new_delta
            || new_snapshot
            || !expired.is_empty()
            || now - server.unf_timestamp >= UNF_REFRESH
            || !self.notification_current(&server)?;
        let notification = if signed {
            server.unf_timestamp = now;
            Some(SignedNotification {
                version: server.version,
                jws: self.sign_notification_file(&server)?,
            })
        } else {
            None
        };

        txn.update_server_status(name, Some(&server)).await?;
        let referenced = server.referenced_files().map(str::to_owned).collect();
        Ok(RunResult {
            outcome: Nrtm4ServerOutcome::Published {
                session_id: server.session_id,
                version: server.version,
                new_delta,
                new_snapshot,
                signed,
            },
            notification,
            expired,
            referenced,
        })
    }

    fn snapshot_interval(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.snapshot_interval).unwrap_or(TimeDelta::MAX)
    }

    /// Whether the notification file on disk was written at or after the
    /// recorded signing time.
    fn notification_current(&self, server: &ServerStatus) -> Result<bool, MirrorError> {
        let entries = self.ports.directory.list()?;
        let current = entries.iter().any(|entry| {
            entry.name == UNF_FILENAME && entry.modified + UNF_MTIME_SLACK >= server.unf_timestamp
        });
        if !current {
            warn!(source = %self.source.name, "notification file is missing or older than the status");
        }
        Ok(current)
    }

    fn files_present(&self, server: &ServerStatus) -> Result<bool, MirrorError> {
        for file in server.referenced_files() {
            if !self.ports.directory.exists(file)? {
                warn!(source = %self.source.name, file, "published file is missing");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn publish_text(&self, text: &str, object_class: &str, pk: &str) -> String {
        prepare_for_publication(text, object_class, pk, &self.source.dummify)
    }

    fn delta_change(&self, entry: &JournalEntry) -> DeltaChange {
        match entry.operation {
            DatabaseOperation::AddOrUpdate => DeltaChange::AddModify {
                object: self.publish_text(&entry.object_text, &entry.object_class, &entry.rpsl_pk),
            },
            DatabaseOperation::Delete => DeltaChange::Delete {
                object_class: entry.object_class.clone(),
                primary_key: entry.rpsl_pk.clone(),
            },
        }
    }

    async fn write_snapshot(
        &self,
        txn: &mut dyn DatabaseTransaction,
        session_id: Uuid,
        version: u64,
        global_serial: u64,
        now: DateTime<Utc>,
    ) -> Result<SnapshotRecord, MirrorError> {
        let objects = txn.objects_for_source(&self.source.name).await?;
        let count = objects.len();
        let (filename, hash) = self.publish_data_file(
            NrtmFileType::Snapshot,
            session_id,
            version,
            objects.iter().map(|object| SnapshotObject {
                object: self.publish_text(&object.text, &object.object_class, &object.pk),
            }),
        )?;
        info!(source = %self.source.name, version, global_serial, objects = count, "snapshot written");
        Ok(SnapshotRecord {
            version,
            global_serial,
            filename,
            hash,
            timestamp: now,
        })
    }

    fn publish_data_file<I, T>(
        &self,
        file_type: NrtmFileType,
        session_id: Uuid,
        version: u64,
        records: I,
    ) -> Result<(String, String), MirrorError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let filename = data_file_name(file_type, version);
        let header = DataFileHeader {
            nrtm_version: NRTM_VERSION,
            file_type,
            source: self.source.name.clone(),
            session_id,
            version,
        };
        let pending = self.ports.directory.create(&filename)?;
        let (pending, hash, _) = write_data_file(pending, &header, records)?;
        pending.commit()?;
        Ok((filename, hash))
    }

    fn sign_notification_file(&self, server: &ServerStatus) -> Result<String, MirrorError> {
        let signing = |err: &dyn std::fmt::Display| {
            MirrorError::storage(format!("cannot sign notification file: {err}"))
        };
        let next_signing_key = self
            .keys
            .next
            .as_ref()
            .map(|key| public_key_to_pem(&key.verifying_key()))
            .transpose()
            .map_err(|err| signing(&err))?;
        let unf = UpdateNotificationFile {
            nrtm_version: NRTM_VERSION,
            timestamp: server.unf_timestamp,
            file_type: NrtmFileType::Notification,
            next_signing_key,
            source: self.source.name.clone(),
            session_id: server.session_id,
            version: server.version,
            snapshot: FileReference {
                version: server.snapshot.version,
                url: server.snapshot.filename.clone(),
                hash: server.snapshot.hash.clone(),
            },
            deltas: server
                .deltas
                .iter()
                .map(|delta| FileReference {
                    version: delta.version,
                    url: delta.filename.clone(),
                    hash: delta.hash.clone(),
                })
                .collect(),
        };
        let payload = serde_json::to_vec(&unf).map_err(|err| signing(&err))?;
        sign_compact(&payload, &self.keys.current).map_err(|err| signing(&err))
    }

    fn write_notification_file(&self, notification: &SignedNotification) -> Result<(), MirrorError> {
        let mut pending = self.ports.directory.create(UNF_FILENAME)?;
        pending
            .write_all(notification.jws.as_bytes())
            .map_err(|err| MirrorError::storage(format!("cannot write {UNF_FILENAME}: {err}")))?;
        pending.commit()?;
        info!(
            source = %self.source.name,
            version = notification.version,
            "notification file signed"
        );
        Ok(())
    }

    fn sweep_dangling(&self, referenced: &[String]) {
        let name = &self.source.name;
        let now = self.ports.clock.utc();
        let entries = match self.ports.directory.list() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(source = %name, error = %err, "cannot list publication directory");
                return;
            }
        };
        for entry in entries {
            let dangling = is_data_file_name(&entry.name)
                && !referenced.contains(&entry.name)
                && now - entry.modified >= DANGLING_MIN_AGE;
            if !dangling {
                continue;
            }
            match self.ports.directory.remove(&entry.name) {
                Ok(()) => info!(source = %name, file = %entry.name, "dangling file removed"),
                Err(err) => warn!(source = %name, file = %entry.name, error = %err, "cannot remove dangling file"),
            }
        }
    }
}

#[cfg(test)]
mod tests;
