//! NRTM v4 client: pulls a remote publication into the local database.
//!
//! One run fetches the signed notification file, verifies it against the
//! trusted keys, decides between a snapshot reload and delta application,
//! and applies the files. Everything, including the new [`ClientStatus`],
//! is written in a single transaction: a failed run leaves the previous
//! state untouched and the next run starts from the same point.

use std::collections::BTreeMap;
use std::sync::Arc;

use mockable::Clock;
use tracing::{info, warn};
use url::Url;

use crate::domain::hashing::{sha256_hex, sha256_hex_reader};
use crate::domain::journal::JournalEntryOrigin;
use crate::domain::mirror::{admit_object, end_published_session};
use crate::domain::ports::{DatabaseHandler, DatabaseTransaction, FileRetriever, RpslParser};
use crate::domain::signature::{public_key_from_pem, same_public_key, verify_compact};
use crate::domain::{ClientStatus, FileFingerprint, MirrorError, Nrtm4ClientConfig, SourceConfig};

use super::files::DataFileReader;
use super::types::{
    DeltaChange, FileReference, NrtmFileType, SnapshotObject, UpdateNotificationFile,
};

/// Port bundle required by the NRTM v4 client.
#[derive(Clone)]
pub struct Nrtm4ClientPorts {
    /// Object store.
    pub database: Arc<dyn DatabaseHandler>,
    /// Notification and data file retrieval.
    pub retriever: Arc<dyn FileRetriever>,
    /// Object parser.
    pub parser: Arc<dyn RpslParser>,
    /// Time source for freshness checks.
    pub clock: Arc<dyn Clock>,
}

/// What a client run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nrtm4ClientOutcome {
    /// The source was reloaded from the snapshot, then brought up to date.
    Reloaded {
        /// Version now held.
        version: u64,
        /// Objects loaded from the snapshot.
        objects: u64,
        /// Deltas applied after the snapshot.
        deltas: usize,
    },
    /// Deltas were applied on top of the previous state.
    Updated {
        /// Version now held.
        version: u64,
        /// Deltas applied.
        deltas: usize,
    },
    /// Nothing newer was published.
    UpToDate {
        /// Version held.
        version: u64,
    },
}

/// Which key verified the notification file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrustedKey {
    Initial,
    Current,
    Next,
}

/// How to get from the stored state to the published one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPlan {
    Reload { reason: &'static str },
    Deltas { next_version: u64 },
    UpToDate,
}

/// Pulls one source over NRTM v4.
pub struct Nrtm4Client {
    source: Arc<SourceConfig>,
    config: Nrtm4ClientConfig,
    ports: Nrtm4ClientPorts,
}

impl Nrtm4Client {
    /// Build a client for `source` using its NRTM v4 client settings.
    #[must_use]
    pub const fn new(
        source: Arc<SourceConfig>,
        config: Nrtm4ClientConfig,
        ports: Nrtm4ClientPorts,
    ) -> Self {
        Self {
            source,
            config,
            ports,
        }
    }

    /// Run one synchronisation.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] for any transport, integrity, protocol, trust
    /// or storage failure. Nothing is committed in that case.
    pub async fn run(&self) -> Result<Nrtm4ClientOutcome, MirrorError> {
        let mut txn = self.ports.database.begin().await?;
        match self.run_in(txn.as_mut()).await {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(source = %self.source.name, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn run_in(
        &self,
        txn: &mut dyn DatabaseTransaction,
    ) -> Result<Nrtm4ClientOutcome, MirrorError> {
        let name = &self.source.name;
        let now = self.ports.clock.utc();
        let status = txn.status_for(name).await?;
        let force_reload = status.as_ref().is_some_and(|status| status.force_reload);
        let previous = status.and_then(|status| status.nrtm4_client);

        let unf_url = &self.config.notification_file_url;
        let signed = self.ports.retriever.retrieve_bytes(unf_url).await?;
        let signed = String::from_utf8(signed).map_err(|_| {
            MirrorError::protocol(format!("notification file {unf_url} is not UTF-8"))
        })?;
        let (payload, trusted) = self.verify(&signed, previous.as_ref())?;
        let unf: UpdateNotificationFile = serde_json::from_slice(&payload).map_err(|err| {
            MirrorError::protocol(format!("notification file is not valid JSON: {err}"))
        })?;
        unf.validate(name, now)?;

        let same_session = previous
            .as_ref()
            .filter(|previous| previous.session_id == unf.session_id);
        if let Some(previous) = same_session {
            check_history(&previous.previous_file_hashes, &unf)?;
        }

        let plan = plan_sync(previous.as_ref(), force_reload, &unf)?;
        let outcome = match plan {
            SyncPlan::UpToDate => {
                info!(source = %name, version = unf.version, "NRTM v4 source is up to date");
                Nrtm4ClientOutcome::UpToDate {
                    version: unf.version,
                }
            }
            SyncPlan::Reload { reason } => {
                info!(source = %name, reason, session = %unf.session_id, version = unf.version, "reloading from snapshot");
                let objects = self.load_snapshot(txn, &unf).await?;
                let deltas = match unf.snapshot.version.checked_add(1) {
                    Some(first) => self.apply_deltas(txn, &unf, first).await?,
                    None => 0,
                };
                txn.set_force_reload(name, false).await?;
                Nrtm4ClientOutcome::Reloaded {
                    version: unf.version,
                    objects,
                    deltas,
                }
            }
            SyncPlan::Deltas { next_version } => {
                let deltas = self.apply_deltas(txn, &unf, next_version).await?;
                Nrtm4ClientOutcome::Updated {
                    version: unf.version,
                    deltas,
                }
            }
        };

        let (current_key, next_key) = match trusted {
            TrustedKey::Initial => (
                Some(self.config.initial_public_key.clone()),
                unf.next_signing_key.clone(),
            ),
            TrustedKey::Current => (
                previous.as_ref().and_then(|previous| previous.current_key.clone()),
                unf.next_signing_key.clone(),
            ),
            TrustedKey::Next => {
                let rotated = previous.as_ref().and_then(|previous| previous.next_key.clone());
                let key_changed = match (
                    previous.as_ref().and_then(|previous| previous.current_key.as_deref()),
                    rotated.as_deref(),
                ) {
                    (Some(current), Some(next)) => !same_public_key(current, next),
                    _ => true,
                };
                info!(
                    source = %name,
                    key_changed,
                    "notification file signed with the announced next key; rotating"
                );
                (rotated, unf.next_signing_key.clone())
            }
        };
        let history = merge_history(same_session.map(|previous| &previous.previous_file_hashes), &unf);
        let new_status = ClientStatus {
            session_id: unf.session_id,
            version: unf.version,
            current_key,
            next_key,
            previous_file_hashes: history,
        };
        txn.update_client_status(name, Some(&new_status)).await?;
        Ok(outcome)
    }

    fn verify(
        &self,
        signed: &str,
        previous: Option<&ClientStatus>,
    ) -> Result<(Vec<u8>, TrustedKey), MirrorError> {
        let name = &self.source.name;
        let initial = public_key_from_pem(&self.config.initial_public_key).map_err(|err| {
            MirrorError::signature_invalid(format!("configured initial key for {name} is unusable: {err}"))
        })?;

        let Some(current) = previous.and_then(|previous| previous.current_key.as_deref()) else {
            return verify_compact(signed, &initial)
                .map(|payload| (payload, TrustedKey::Initial))
                .map_err(|err| {
                    MirrorError::signature_invalid(format!(
                        "notification file for {name} does not verify under the initial key: {err}"
                    ))
                });
        };

        let candidates = [
            (Some(current), TrustedKey::Current),
            (previous.and_then(|previous| previous.next_key.as_deref()), TrustedKey::Next),
        ];
        for (pem, trusted) in candidates {
            let Some(key) = pem.and_then(|pem| public_key_from_pem(pem).ok()) else {
                continue;
            };
            if let Ok(payload) = verify_compact(signed, &key) {
                return Ok((payload, trusted));
            }
        }

        if verify_compact(signed, &initial).is_ok() {
            return Err(MirrorError::untrusted_signing_key(format!(
                "notification file for {name} is signed with the configured initial key, which \
                 is no longer the known current key. If the publisher rotated keys without \
                 announcing it, clear the known keys with `irrd-mirrorctl client-clear-known-keys {name}`"
            )));
        }
        Err(MirrorError::signature_invalid(format!(
            "notification file for {name} does not verify under the current or next known key"
        )))
    }

    fn resolve(&self, reference: &FileReference) -> Result<Url, MirrorError> {
        self.config
            .notification_file_url
            .join(&reference.url)
            .map_err(|err| {
                MirrorError::protocol(format!("invalid file URL `{}`: {err}", reference.url))
            })
    }

    async fn load_snapshot(
        &self,
        txn: &mut dyn DatabaseTransaction,
        unf: &UpdateNotificationFile,
    ) -> Result<u64, MirrorError> {
        let name = &self.source.name;
        let url = self.resolve(&unf.snapshot)?;
        let file = self.ports.retriever.retrieve_to_file(&url, false).await?;
        let local = |err: std::io::Error| MirrorError::storage(format!("cannot read snapshot {url}: {err}"));

        let actual = sha256_hex_reader(file.open().map_err(local)?).map_err(local)?;
        verify_hash(&format!("snapshot-{}", unf.snapshot.version), &url, &unf.snapshot.hash, &actual)?;

        let mut reader = DataFileReader::open(file.open().map_err(local)?)?;
        reader.header().validate(
            NrtmFileType::Snapshot,
            name,
            unf.session_id,
            unf.snapshot.version,
        )?;

        let removed = txn
            .delete_all_rpsl_objects(name, JournalEntryOrigin::Mirror)
            .await?;
        txn.disable_journaling();
        let mut loaded = 0_u64;
        while let Some(record) = reader.next_record::<SnapshotObject>()? {
            let Some(object) = admit_object(self.ports.parser.as_ref(), &self.source, &record.object)
            else {
                continue;
            };
            txn.upsert_rpsl_object(&object, JournalEntryOrigin::Mirror, None)
                .await?;
            loaded += 1;
        }
        txn.enable_journaling();
        end_published_session(txn, name).await?;
        info!(source = %name, removed, loaded, version = unf.snapshot.version, "snapshot loaded");
        Ok(loaded)
    }

    async fn apply_deltas(
        &self,
        txn: &mut dyn DatabaseTransaction,
        unf: &UpdateNotificationFile,
        from_version: u64,
    ) -> Result<usize, MirrorError> {
        let mut applied = 0;
        for reference in unf.deltas.iter().filter(|delta| delta.version >= from_version) {
            self.apply_delta(txn, unf, reference).await?;
            applied += 1;
        }
        Ok(applied)
    }

    async fn apply_delta(
        &self,
        txn: &mut dyn DatabaseTransaction,
        unf: &UpdateNotificationFile,
        reference: &FileReference,
    ) -> Result<(), MirrorError> {
        let name = &self.source.name;
        let url = self.resolve(reference)?;
        let bytes = self.ports.retriever.retrieve_bytes(&url).await?;
        verify_hash(
            &format!("delta-{}", reference.version),
            &url,
            &reference.hash,
            &sha256_hex(&bytes),
        )?;

        let mut reader = DataFileReader::open(bytes.as_slice())?;
        reader
            .header()
            .validate(NrtmFileType::Delta, name, unf.session_id, reference.version)?;

        let mut records = 0_u64;
        while let Some(change) = reader.next_record::<DeltaChange>()? {
            records += 1;
            match change {
                DeltaChange::AddModify { object } => {
                    if let Some(object) = admit_object(self.ports.parser.as_ref(), &self.source, &object) {
                        txn.upsert_rpsl_object(&object, JournalEntryOrigin::Mirror, None)
                            .await?;
                    }
                }
                DeltaChange::Delete {
                    object_class,
                    primary_key,
                } => {
                    if self.source.accepts_class(&object_class) {
                        txn.delete_rpsl_object(
                            name,
                            &object_class,
                            &primary_key,
                            JournalEntryOrigin::Mirror,
                            None,
                        )
                        .await?;
                    }
                }
            }
        }
        if records == 0 {
            return Err(MirrorError::protocol(format!(
                "delta-{} at {url} contains no changes",
                reference.version
            )));
        }
        info!(source = %name, version = reference.version, records, "delta applied");
        Ok(())
    }
}

fn verify_hash(reference: &str, url: &Url, expected: &str, actual: &str) -> Result<(), MirrorError> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(MirrorError::integrity(format!(
            "{reference} at {url} has hash {actual}, expected {expected}"
        )))
    }
}

/// Fail when a reference seen in an earlier run now points elsewhere.
fn check_history(
    previous: &BTreeMap<String, FileFingerprint>,
    unf: &UpdateNotificationFile,
) -> Result<(), MirrorError> {
    for (key, fingerprint) in unf.fingerprints() {
        if let Some(known) = previous.get(&key)
            && known != &fingerprint
        {
            return Err(MirrorError::integrity(format!(
                "publisher is rewriting history: {key} was {} ({}), now {} ({})",
                known.url, known.hash, fingerprint.url, fingerprint.hash
            )));
        }
    }
    Ok(())
}

fn reference_version(key: &str) -> Option<u64> {
    key.rsplit_once('-')
        .and_then(|(_, version)| version.parse().ok())
}

/// Remembered references for the next run: everything still listed plus
/// earlier entries that are not older than the oldest listed file.
fn merge_history(
    previous: Option<&BTreeMap<String, FileFingerprint>>,
    unf: &UpdateNotificationFile,
) -> BTreeMap<String, FileFingerprint> {
    let oldest = unf
        .deltas
        .first()
        .map_or(unf.snapshot.version, |delta| delta.version.min(unf.snapshot.version));
    let mut history: BTreeMap<String, FileFingerprint> = previous
        .into_iter()
        .flatten()
        .filter(|(key, _)| reference_version(key).is_some_and(|version| version >= oldest))
        .map(|(key, fingerprint)| (key.clone(), fingerprint.clone()))
        .collect();
    history.extend(unf.fingerprints());
    history
}

fn plan_sync(
    previous: Option<&ClientStatus>,
    force_reload: bool,
    unf: &UpdateNotificationFile,
) -> Result<SyncPlan, MirrorError> {
    let Some(previous) = previous else {
        return Ok(SyncPlan::Reload {
            reason: "no previous state",
        });
    };
    if force_reload {
        return Ok(SyncPlan::Reload {
            reason: "force reload requested",
        });
    }
    if previous.session_id != unf.session_id {
        return Ok(SyncPlan::Reload {
            reason: "session changed",
        });
    }
    if unf.version < previous.version {
        return Err(MirrorError::protocol(format!(
            "notification file version {} is older than the applied version {}",
            unf.version, previous.version
        )));
    }
    if unf.version == previous.version {
        return Ok(SyncPlan::UpToDate);
    }
    let next_version = previous.version + 1;
    match unf.deltas.first() {
        Some(first) if first.version <= next_version => Ok(SyncPlan::Deltas { next_version }),
        _ => Ok(SyncPlan::Reload {
            reason: "deltas no longer cover the applied version",
        }),
    }
}

#[cfg(test)]
mod tests;
