//! Per-source mirroring status persisted alongside the objects.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything the daemon remembers about one source between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStatus {
    /// Source name.
    pub source: String,
    /// Oldest journal serial still retained.
    pub serial_oldest_journal: Option<u64>,
    /// Newest journal serial.
    pub serial_newest_journal: Option<u64>,
    /// Newest serial received from the NRTM v3 remote.
    pub serial_newest_mirror: Option<u64>,
    /// Operator requested a full reload.
    pub force_reload: bool,
    /// Last mirroring error, if the most recent failure was recorded.
    pub last_error: Option<String>,
    /// When `last_error` was recorded.
    pub last_error_timestamp: Option<DateTime<Utc>>,
    /// NRTM v4 client progress.
    pub nrtm4_client: Option<ClientStatus>,
    /// NRTM v4 server publication state.
    pub nrtm4_server: Option<ServerStatus>,
    /// Last modification time of this row.
    pub updated: DateTime<Utc>,
}

impl DatabaseStatus {
    /// Empty status for a source that has never been touched.
    #[must_use]
    pub fn new(source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            serial_oldest_journal: None,
            serial_newest_journal: None,
            serial_newest_mirror: None,
            force_reload: false,
            last_error: None,
            last_error_timestamp: None,
            nrtm4_client: None,
            nrtm4_server: None,
            updated: now,
        }
    }
}

/// URL and hash recorded for one published file reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// URL as it appeared in the notification file.
    pub url: String,
    /// Lowercase hex SHA-256 of the file.
    pub hash: String,
}

/// NRTM v4 client progress for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatus {
    /// Session the local copy belongs to.
    pub session_id: Uuid,
    /// Last version applied.
    pub version: u64,
    /// PEM public key currently trusted for the notification file.
    pub current_key: Option<String>,
    /// PEM public key announced for the next rotation.
    pub next_key: Option<String>,
    /// References seen so far in this session, keyed `snapshot-N`/`delta-N`.
    #[serde(default)]
    pub previous_file_hashes: BTreeMap<String, FileFingerprint>,
}

/// Last snapshot published by the local NRTM v4 server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Version the snapshot represents.
    pub version: u64,
    /// Newest journal serial included in the snapshot.
    pub global_serial: u64,
    /// File name inside the publication directory.
    pub filename: String,
    /// Hex SHA-256 of the compressed file.
    pub hash: String,
    /// When the snapshot was written.
    pub timestamp: DateTime<Utc>,
}

/// One delta published by the local NRTM v4 server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRecord {
    /// Delta version.
    pub version: u64,
    /// File name inside the publication directory.
    pub filename: String,
    /// Hex SHA-256 of the compressed file.
    pub hash: String,
    /// When the delta was written.
    pub timestamp: DateTime<Utc>,
    /// First journal serial covered.
    pub serial_start: u64,
    /// Last journal serial covered.
    pub serial_end: u64,
}

/// NRTM v4 server publication state for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Published session.
    pub session_id: Uuid,
    /// Current published version.
    pub version: u64,
    /// Most recent snapshot.
    pub snapshot: SnapshotRecord,
    /// Retained deltas in version order.
    #[serde(default)]
    pub deltas: Vec<DeltaRecord>,
    /// When the notification file was last signed.
    pub unf_timestamp: DateTime<Utc>,
}

impl ServerStatus {
    /// Newest journal serial covered by the publication.
    #[must_use]
    pub fn newest_serial(&self) -> u64 {
        self.deltas
            .last()
            .map_or(self.snapshot.global_serial, |delta| {
                delta.serial_end.max(self.snapshot.global_serial)
            })
    }

    /// Every file name the publication refers to.
    pub fn referenced_files(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.snapshot.filename.as_str())
            .chain(self.deltas.iter().map(|delta| delta.filename.as_str()))
    }
}
