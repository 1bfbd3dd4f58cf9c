//! NRTM v4 documents: the notification file and data file records.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FileFingerprint, MirrorError};

/// Protocol version carried by every NRTM v4 document.
pub const NRTM_VERSION: u8 = 4;

/// Oldest notification file timestamp a client accepts.
pub const UNF_FRESHNESS: TimeDelta = TimeDelta::hours(24);

/// Document type literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NrtmFileType {
    /// Update Notification File.
    Notification,
    /// Snapshot data file.
    Snapshot,
    /// Delta data file.
    Delta,
}

impl NrtmFileType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Snapshot => "snapshot",
            Self::Delta => "delta",
        }
    }
}

/// Reference from the notification file to a data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Version of the referenced file.
    pub version: u64,
    /// URL, usually relative to the notification file.
    pub url: String,
    /// Hex SHA-256 of the file as published.
    pub hash: String,
}

impl FileReference {
    fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint {
            url: self.url.clone(),
            hash: self.hash.clone(),
        }
    }
}

/// Decoded payload of the Update Notification File.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotificationFile {
    /// Always [`NRTM_VERSION`].
    pub nrtm_version: u8,
    /// When the file was signed.
    pub timestamp: DateTime<Utc>,
    /// Always [`NrtmFileType::Notification`].
    #[serde(rename = "type")]
    pub file_type: NrtmFileType,
    /// PEM public key the publisher will sign with next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_signing_key: Option<String>,
    /// Source name.
    pub source: String,
    /// Publisher session.
    pub session_id: Uuid,
    /// Current version.
    pub version: u64,
    /// Current snapshot.
    pub snapshot: FileReference,
    /// Retained deltas in version order.
    #[serde(default)]
    pub deltas: Vec<FileReference>,
}

fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|byte| byte.is_ascii_hexdigit())
}

impl UpdateNotificationFile {
    /// Check the document against `expected_source` and the protocol rules.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Protocol`] naming the first violated rule.
    pub fn validate(&self, expected_source: &str, now: DateTime<Utc>) -> Result<(), MirrorError> {
        if self.nrtm_version != NRTM_VERSION {
            return Err(MirrorError::protocol(format!(
                "notification file has nrtm_version {}, expected {NRTM_VERSION}",
                self.nrtm_version
            )));
        }
        if self.file_type != NrtmFileType::Notification {
            return Err(MirrorError::protocol(format!(
                "notification file has type {}",
                self.file_type.as_str()
            )));
        }
        if !self.source.eq_ignore_ascii_case(expected_source) {
            return Err(MirrorError::protocol(format!(
                "notification file is for source {}, expected {expected_source}",
                self.source
            )));
        }
        if self.snapshot.version == 0 || self.snapshot.version > self.version {
            return Err(MirrorError::protocol(format!(
                "snapshot version {} is outside 1..={}",
                self.snapshot.version, self.version
            )));
        }
        for pair in self.deltas.windows(2) {
            if let [previous, next] = pair
                && previous.version.checked_add(1) != Some(next.version)
            {
                return Err(MirrorError::protocol(format!(
                    "delta versions are not contiguous: {} follows {}",
                    next.version, previous.version
                )));
            }
        }
        let newest = self
            .deltas
            .last()
            .map_or(self.snapshot.version, |delta| {
                delta.version.max(self.snapshot.version)
            });
        if self.version != newest {
            return Err(MirrorError::protocol(format!(
                "notification file version {} does not match newest file version {newest}",
                self.version
            )));
        }
        if let Some(reference) = self
            .references()
            .find(|(_, reference)| !is_sha256_hex(&reference.hash))
        {
            return Err(MirrorError::protocol(format!(
                "{} has a malformed hash `{}`",
                reference.0, reference.1.hash
            )));
        }
        if self.timestamp < now - UNF_FRESHNESS {
            return Err(MirrorError::protocol(format!(
                "notification file timestamp {} is older than {} hours",
                self.timestamp,
                UNF_FRESHNESS.num_hours()
            )));
        }
        Ok(())
    }

    /// Every file reference keyed by its logical name (`snapshot-N`, `delta-N`).
    pub fn references(&self) -> impl Iterator<Item = (String, &FileReference)> {
        std::iter::once((
            format!("snapshot-{}", self.snapshot.version),
            &self.snapshot,
        ))
        .chain(
            self.deltas
                .iter()
                .map(|delta| (format!("delta-{}", delta.version), delta)),
        )
    }

    /// Logical name to URL and hash for every reference.
    #[must_use]
    pub fn fingerprints(&self) -> BTreeMap<String, FileFingerprint> {
        self.references()
            .map(|(key, reference)| (key, reference.fingerprint()))
            .collect()
    }
}

/// First record of a snapshot or delta file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileHeader {
    /// Always [`NRTM_VERSION`].
    pub nrtm_version: u8,
    /// Snapshot or delta.
    #[serde(rename = "type")]
    pub file_type: NrtmFileType,
    /// Source name.
    pub source: String,
    /// Publisher session.
    pub session_id: Uuid,
    /// File version.
    pub version: u64,
}

impl DataFileHeader {
    /// Check the header against the reference that led to the file.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Protocol`] on any mismatch.
    pub fn validate(
        &self,
        file_type: NrtmFileType,
        source: &str,
        session_id: Uuid,
        version: u64,
    ) -> Result<(), MirrorError> {
        let mismatch = |what: &str, found: String, expected: String| -> Result<(), MirrorError> {
            Err(MirrorError::protocol(format!(
                "{} header {what} is {found}, expected {expected}",
                file_type.as_str()
            )))
        };
        if self.nrtm_version != NRTM_VERSION {
            return mismatch(
                "nrtm_version",
                self.nrtm_version.to_string(),
                NRTM_VERSION.to_string(),
            );
        }
        if self.file_type != file_type {
            return mismatch(
                "type",
                self.file_type.as_str().to_owned(),
                file_type.as_str().to_owned(),
            );
        }
        if !self.source.eq_ignore_ascii_case(source) {
            return mismatch("source", self.source.clone(), source.to_owned());
        }
        if self.session_id != session_id {
            return mismatch(
                "session_id",
                self.session_id.to_string(),
                session_id.to_string(),
            );
        }
        if self.version != version {
            return mismatch("version", self.version.to_string(), version.to_string());
        }
        Ok(())
    }
}

/// Body record of a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotObject {
    /// Object text.
    pub object: String,
}

/// Body record of a delta file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum DeltaChange {
    /// Create or replace an object.
    AddModify {
        /// Object text.
        object: String,
    },
    /// Remove an object.
    Delete {
        /// Object class.
        object_class: String,
        /// Primary key.
        primary_key: String,
    },
}
