//! Committed state and the write log replayed into it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::domain::{
    ClientStatus, DatabaseOperation, DatabaseStatus, JournalEntry, JournalEntryOrigin,
    RpslObject, SerialRange, ServerStatus,
};

/// `(source, object class, primary key)`.
type ObjectKey = (String, String, String);

/// One logged mutation.
#[derive(Debug, Clone)]
pub(super) enum PendingWrite {
    Upsert {
        object: RpslObject,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
        journaled: bool,
    },
    Delete {
        source: String,
        object_class: String,
        pk: String,
        origin: JournalEntryOrigin,
        serial_nrtm: Option<u64>,
        journaled: bool,
    },
    DeleteAll {
        source: String,
        origin: JournalEntryOrigin,
        journaled: bool,
    },
    MirrorSerial {
        source: String,
        serial: u64,
    },
    ForceReload {
        source: String,
        force_reload: bool,
    },
    ClearError {
        source: String,
    },
    Client {
        source: String,
        status: Option<ClientStatus>,
    },
    Server {
        source: String,
        status: Option<ServerStatus>,
    },
}

#[derive(Debug, Clone, Default)]
pub(super) struct MemoryState {
    objects: BTreeMap<ObjectKey, RpslObject>,
    journal: BTreeMap<String, Vec<JournalEntry>>,
    pub(super) statuses: BTreeMap<String, DatabaseStatus>,
}

fn key(source: &str, object_class: &str, pk: &str) -> ObjectKey {
    (source.to_owned(), object_class.to_owned(), pk.to_owned())
}

impl MemoryState {
    pub(super) fn objects_for_source(&self, source: &str) -> Vec<RpslObject> {
        self.objects
            .iter()
            .filter(|((object_source, _, _), _)| object_source == source)
            .map(|(_, object)| object.clone())
            .collect()
    }

    pub(super) fn journal_entries(&self, source: &str, range: SerialRange) -> Vec<JournalEntry> {
        self.journal
            .get(source)
            .into_iter()
            .flatten()
            .filter(|entry| range.contains(entry.serial_global))
            .cloned()
            .collect()
    }

    pub(super) fn status_mut(&mut self, source: &str, now: DateTime<Utc>) -> &mut DatabaseStatus {
        let status = self
            .statuses
            .entry(source.to_owned())
            .or_insert_with(|| DatabaseStatus::new(source, now));
        status.updated = now;
        status
    }

    fn append_journal(&mut self, entry: JournalDraft<'_>, now: DateTime<Utc>) {
        let status = self.status_mut(entry.source, now);
        let serial = status.serial_newest_journal.map_or(1, |serial| serial + 1);
        status.serial_newest_journal = Some(serial);
        status.serial_oldest_journal.get_or_insert(serial);
        self.journal
            .entry(entry.source.to_owned())
            .or_default()
            .push(JournalEntry {
                source: entry.source.to_owned(),
                serial_global: serial,
                serial_nrtm: entry.serial_nrtm,
                operation: entry.operation,
                object_class: entry.object.object_class.clone(),
                rpsl_pk: entry.object.pk.clone(),
                object_text: entry.object.text.clone(),
                origin: entry.origin,
                timestamp: now,
            });
    }

    /// Apply one write; returns whether it changed an object.
    pub(super) fn apply(&mut self, write: &PendingWrite, now: DateTime<Utc>) -> bool {
        match write {
            PendingWrite::Upsert {
                object,
                origin,
                serial_nrtm,
                journaled,
            } => {
                self.objects.insert(
                    key(&object.source, &object.object_class, &object.pk),
                    object.clone(),
                );
                if *journaled {
                    self.append_journal(
                        JournalDraft {
                            source: &object.source,
                            operation: DatabaseOperation::AddOrUpdate,
                            object,
                            origin: *origin,
                            serial_nrtm: *serial_nrtm,
                        },
                        now,
                    );
                }
                true
            }
            PendingWrite::Delete {
                source,
                object_class,
                pk,
                origin,
                serial_nrtm,
                journaled,
            } => {
                let Some(object) = self.objects.remove(&key(source, object_class, pk)) else {
                    return false;
                };
                if *journaled {
                    self.append_journal(
                        JournalDraft {
                            source,
                            operation: DatabaseOperation::Delete,
                            object: &object,
                            origin: *origin,
                            serial_nrtm: *serial_nrtm,
                        },
                        now,
                    );
                }
                true
            }
            PendingWrite::DeleteAll {
                source,
                origin,
                journaled,
            } => {
                let removed: Vec<RpslObject> = self.objects_for_source(source);
                self.objects
                    .retain(|(object_source, _, _), _| object_source != source);
                if *journaled {
                    for object in &removed {
                        self.append_journal(
                            JournalDraft {
                                source,
                                operation: DatabaseOperation::Delete,
                                object,
                                origin: *origin,
                                serial_nrtm: None,
                            },
                            now,
                        );
                    }
                }
                !removed.is_empty()
            }
            PendingWrite::MirrorSerial { source, serial } => {
                self.status_mut(source, now).serial_newest_mirror = Some(*serial);
                false
            }
            PendingWrite::ForceReload {
                source,
                force_reload,
            } => {
                self.status_mut(source, now).force_reload = *force_reload;
                false
            }
            PendingWrite::ClearError { source } => {
                let status = self.status_mut(source, now);
                status.last_error = None;
                status.last_error_timestamp = None;
                false
            }
            PendingWrite::Client { source, status } => {
                self.status_mut(source, now).nrtm4_client = status.clone();
                false
            }
            PendingWrite::Server { source, status } => {
                self.status_mut(source, now).nrtm4_server = status.clone();
                false
            }
        }
    }
}

struct JournalDraft<'a> {
    source: &'a str,
    operation: DatabaseOperation,
    object: &'a RpslObject,
    origin: JournalEntryOrigin,
    serial_nrtm: Option<u64>,
}
