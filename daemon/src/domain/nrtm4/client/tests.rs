//! NRTM v4 client behaviour against an in-memory publisher.

use std::collections::BTreeSet;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rstest::{fixture, rstest};
use url::Url;
use uuid::Uuid;

use super::*;
use crate::domain::{DatabaseOperation, MirrorErrorKind, ServerStatus, SnapshotRecord};
use crate::domain::nrtm4::DeltaChange;
use crate::outbound::memory::MemoryDatabase;
use crate::outbound::rpsl_text_parser::RpslTextParser;
use crate::test_support::MutableClock;
use crate::test_support::fixtures::{fixed_now, mntner, person, public_pem, route, signing_key};
use crate::test_support::remote::{MemoryRemote, Nrtm4Publisher};

struct Harness {
    clock: Arc<MutableClock>,
    remote: Arc<MemoryRemote>,
    database: MemoryDatabase,
    publisher: Nrtm4Publisher,
    initial: SigningKey,
    source: SourceConfig,
}

impl Harness {
    fn client(&self) -> Nrtm4Client {
        let config = Nrtm4ClientConfig {
            notification_file_url: self.publisher.notification_url(),
            initial_public_key: public_pem(&self.initial),
        };
        Nrtm4Client::new(
            Arc::new(self.source.clone()),
            config,
            Nrtm4ClientPorts {
                database: Arc::new(self.database.clone()),
                retriever: self.remote.clone(),
                parser: Arc::new(RpslTextParser),
                clock: self.clock.clone(),
            },
        )
    }

    fn client_status(&self) -> Option<ClientStatus> {
        self.database
            .status("TEST")
            .and_then(|status| status.nrtm4_client)
    }

    fn object_keys(&self) -> Vec<String> {
        self.database
            .objects("TEST")
            .into_iter()
            .map(|object| format!("{}:{}", object.object_class, object.pk))
            .collect()
    }

    /// Snapshot v1 with a maintainer and a route, deltas v2 and v3.
    fn publish_initial(&mut self) {
        self.publisher.snapshot(
            1,
            &[
                mntner("TEST-MNT", "TEST"),
                route("192.0.2.0/24", "AS65530", "TEST"),
            ],
        );
        self.publisher.delta(
            2,
            vec![DeltaChange::AddModify {
                object: person("A Person", "AP1-TEST", "TEST"),
            }],
        );
        self.publisher.delta(
            3,
            vec![DeltaChange::Delete {
                object_class: "route".to_owned(),
                primary_key: "192.0.2.0/24AS65530".to_owned(),
            }],
        );
        self.publisher.publish(self.clock.utc());
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let remote = Arc::new(MemoryRemote::default());
    let initial = signing_key(1);
    let base = Url::parse("https://nrtm.example.net/TEST/").expect("base url");
    let publisher = Nrtm4Publisher::new("TEST", base, initial.clone(), Arc::clone(&remote));
    Harness {
        database: MemoryDatabase::new(clock.clone()),
        clock,
        remote,
        publisher,
        initial,
        source: SourceConfig::new("TEST"),
    }
}

#[rstest]
#[tokio::test]
async fn first_run_reloads_from_snapshot_and_applies_newer_deltas(mut harness: Harness) {
    harness.publish_initial();

    let outcome = harness.client().run().await.expect("run");

    assert_eq!(
        outcome,
        Nrtm4ClientOutcome::Reloaded {
            version: 3,
            objects: 2,
            deltas: 2
        }
    );
    assert_eq!(
        harness.object_keys(),
        vec!["mntner:TEST-MNT".to_owned(), "person:AP1-TEST".to_owned()]
    );
    let status = harness.client_status().expect("client status");
    assert_eq!(status.version, 3);
    assert_eq!(status.session_id, harness.publisher.session_id);
    assert_eq!(status.current_key, Some(public_pem(&harness.initial)));
    assert_eq!(status.next_key, None);
    assert!(status.previous_file_hashes.contains_key("snapshot-1"));
    assert!(status.previous_file_hashes.contains_key("delta-3"));

    let journal = harness.database.journal("TEST");
    let operations: Vec<_> = journal.iter().map(|entry| entry.operation).collect();
    assert_eq!(
        operations,
        vec![DatabaseOperation::AddOrUpdate, DatabaseOperation::Delete],
        "snapshot objects load without journaling; delta changes are journaled"
    );
    assert!(journal.iter().all(|entry| entry.origin == JournalEntryOrigin::Mirror));
}

#[rstest]
#[tokio::test]
async fn later_runs_apply_only_new_deltas(mut harness: Harness) {
    harness.publish_initial();
    harness.client().run().await.expect("first run");

    harness.publisher.delta(
        4,
        vec![DeltaChange::AddModify {
            object: route("198.51.100.0/24", "AS65531", "TEST"),
        }],
    );
    harness.clock.advance_hours(1);
    harness.publisher.publish(harness.clock.utc());

    let outcome = harness.client().run().await.expect("second run");
    assert_eq!(
        outcome,
        Nrtm4ClientOutcome::Updated {
            version: 4,
            deltas: 1
        }
    );
    assert!(
        harness
            .object_keys()
            .contains(&"route:198.51.100.0/24AS65531".to_owned())
    );
    assert_eq!(harness.client_status().map(|status| status.version), Some(4));
}

#[rstest]
#[tokio::test]
async fn unchanged_publication_is_up_to_date(mut harness: Harness) {
    harness.publish_initial();
    harness.client().run().await.expect("first run");
    let journal_before = harness.database.journal("TEST").len();

    let outcome = harness.client().run().await.expect("second run");

    assert_eq!(outcome, Nrtm4ClientOutcome::UpToDate { version: 3 });
    assert_eq!(harness.database.journal("TEST").len(), journal_before);
}

#[rstest]
#[tokio::test]
async fn rewritten_history_is_rejected_without_touching_status(mut harness: Harness) {
    harness.publish_initial();
    harness.client().run().await.expect("first run");
    let before = harness.client_status();

    // Same version, different content: the hash of snapshot-1 changes.
    harness.publisher.snapshot(1, &[mntner("OTHER-MNT", "TEST")]);
    harness.publisher.publish(harness.clock.utc());

    let err = harness.client().run().await.expect_err("tampering must fail");
    assert_eq!(err.kind(), MirrorErrorKind::Integrity);
    assert!(err.to_string().contains("rewriting history"), "{err}");
    assert!(err.to_string().contains("snapshot-1"), "{err}");
    assert_eq!(harness.client_status(), before);
}

#[rstest]
#[tokio::test]
async fn announced_next_key_is_adopted_on_rotation(mut harness: Harness) {
    let new_key = signing_key(2);
    harness.publisher.next_key = Some(new_key.clone());
    harness.publish_initial();
    harness.client().run().await.expect("first run");
    let status = harness.client_status().expect("status");
    assert_eq!(status.next_key, Some(public_pem(&new_key)));

    harness.publisher.key = new_key.clone();
    harness.publisher.next_key = None;
    harness.publisher.delta(
        4,
        vec![DeltaChange::Delete {
            object_class: "person".to_owned(),
            primary_key: "AP1-TEST".to_owned(),
        }],
    );
    harness.publisher.publish(harness.clock.utc());

    harness.client().run().await.expect("rotated run");
    let status = harness.client_status().expect("status");
    assert_eq!(status.current_key, Some(public_pem(&new_key)));
    assert_eq!(status.next_key, None);
}

#[rstest]
#[tokio::test]
async fn initial_key_is_untrusted_once_a_rotation_happened(mut harness: Harness) {
    let new_key = signing_key(2);
    harness.publisher.next_key = Some(new_key.clone());
    harness.publish_initial();
    harness.client().run().await.expect("first run");
    harness.publisher.key = new_key;
    harness.publisher.next_key = None;
    harness.publisher.publish(harness.clock.utc());
    harness.client().run().await.expect("rotation run");

    // Falling back to the initial key is a downgrade.
    let unf = harness.publisher.notification(harness.clock.utc());
    harness.publisher.publish_with(&unf, &harness.initial);

    let err = harness.client().run().await.expect_err("must fail");
    assert!(matches!(err, MirrorError::UntrustedSigningKey { .. }), "{err:?}");
    assert_eq!(err.kind(), MirrorErrorKind::Trust);
    assert!(err.to_string().contains("client-clear-known-keys TEST"), "{err}");
}

#[rstest]
#[tokio::test]
async fn signature_under_unknown_key_is_rejected(mut harness: Harness) {
    harness.publish_initial();
    let unf = harness.publisher.notification(harness.clock.utc());
    harness.publisher.publish_with(&unf, &signing_key(9));

    let err = harness.client().run().await.expect_err("must fail");
    assert!(matches!(err, MirrorError::SignatureInvalid { .. }), "{err:?}");
    assert!(harness.client_status().is_none());
    assert!(harness.database.objects("TEST").is_empty());
}

#[rstest]
#[tokio::test]
async fn hash_mismatch_fails_the_run(mut harness: Harness) {
    harness.publish_initial();
    let mut unf = harness.publisher.notification(harness.clock.utc());
    if let Some(delta) = unf.deltas.last_mut() {
        delta.hash = "0".repeat(64);
    }
    harness.publisher.publish_with(&unf, &harness.initial);

    let err = harness.client().run().await.expect_err("must fail");
    assert_eq!(err.kind(), MirrorErrorKind::Integrity);
    assert!(err.to_string().contains("delta-3"), "{err}");
    assert!(harness.database.objects("TEST").is_empty(), "nothing may be committed");
}

#[rstest]
#[tokio::test]
async fn empty_delta_is_a_protocol_error(mut harness: Harness) {
    harness.publisher.snapshot(1, &[mntner("TEST-MNT", "TEST")]);
    harness.publisher.delta(2, Vec::new());
    harness.publisher.publish(harness.clock.utc());

    let err = harness.client().run().await.expect_err("must fail");
    assert_eq!(err.kind(), MirrorErrorKind::Protocol);
    assert!(err.to_string().contains("no changes"), "{err}");
    assert!(harness.client_status().is_none());
}

#[rstest]
#[tokio::test]
async fn stale_notification_file_is_rejected(mut harness: Harness) {
    harness.publish_initial();
    harness.clock.advance_hours(25);

    let err = harness.client().run().await.expect_err("must fail");
    assert_eq!(err.kind(), MirrorErrorKind::Protocol);
    assert!(err.to_string().contains("older than 24 hours"), "{err}");
}

#[rstest]
#[tokio::test]
async fn new_session_triggers_reload(mut harness: Harness) {
    harness.publish_initial();
    harness.client().run().await.expect("first run");

    harness.publisher.session_id = Uuid::new_v4();
    harness.publisher.deltas.clear();
    harness.publisher.snapshot(1, &[mntner("NEW-MNT", "TEST")]);
    harness.publisher.publish(harness.clock.utc());

    let outcome = harness.client().run().await.expect("reload");
    assert_eq!(
        outcome,
        Nrtm4ClientOutcome::Reloaded {
            version: 1,
            objects: 1,
            deltas: 0
        }
    );
    assert_eq!(harness.object_keys(), vec!["mntner:NEW-MNT".to_owned()]);
    let status = harness.client_status().expect("status");
    assert_eq!(status.session_id, harness.publisher.session_id);
    assert!(!status.previous_file_hashes.contains_key("delta-3"));
}

#[rstest]
#[tokio::test]
async fn delta_gap_triggers_reload(mut harness: Harness) {
    harness.publish_initial();
    harness.client().run().await.expect("first run");

    harness.publisher.deltas.clear();
    harness.publisher.snapshot(5, &[mntner("TEST-MNT", "TEST")]);
    harness.publisher.delta(
        5,
        vec![DeltaChange::AddModify {
            object: mntner("OTHER-MNT", "TEST"),
        }],
    );
    harness.publisher.delta(
        6,
        vec![DeltaChange::AddModify {
            object: mntner("THIRD-MNT", "TEST"),
        }],
    );
    harness.publisher.publish(harness.clock.utc());

    let outcome = harness.client().run().await.expect("reload");
    assert_eq!(
        outcome,
        Nrtm4ClientOutcome::Reloaded {
            version: 6,
            objects: 1,
            deltas: 1
        }
    );
    assert_eq!(
        harness.object_keys(),
        vec!["mntner:TEST-MNT".to_owned(), "mntner:THIRD-MNT".to_owned()]
    );
}

#[rstest]
#[tokio::test]
async fn force_reload_flag_reloads_and_is_cleared(mut harness: Harness) {
    harness.publish_initial();
    harness.client().run().await.expect("first run");
    let mut txn = harness.database.begin().await.expect("begin");
    txn.set_force_reload("TEST", true).await.expect("flag");
    txn.commit().await.expect("commit");

    let outcome = harness.client().run().await.expect("reload");

    assert!(matches!(outcome, Nrtm4ClientOutcome::Reloaded { version: 3, .. }));
    assert_eq!(
        harness.database.status("TEST").map(|status| status.force_reload),
        Some(false)
    );
}

#[rstest]
#[tokio::test]
async fn snapshot_reload_ends_the_locally_published_session(mut harness: Harness) {
    let published = ServerStatus {
        session_id: Uuid::new_v4(),
        version: 5,
        snapshot: SnapshotRecord {
            version: 5,
            global_serial: 0,
            filename: "nrtm-snapshot.5.json.gz".to_owned(),
            hash: "ab".repeat(32),
            timestamp: fixed_now(),
        },
        deltas: Vec::new(),
        unf_timestamp: fixed_now(),
    };
    let mut txn = harness.database.begin().await.expect("begin");
    txn.update_server_status("TEST", Some(&published))
        .await
        .expect("server status");
    txn.commit().await.expect("commit");
    harness.publish_initial();

    harness.client().run().await.expect("reload");

    let status = harness.database.status("TEST").expect("status");
    assert!(status.nrtm4_server.is_none());
    assert!(status.nrtm4_client.is_some());
}

#[rstest]
#[tokio::test]
async fn snapshot_at_the_largest_version_applies_no_deltas(mut harness: Harness) {
    harness
        .publisher
        .snapshot(u64::MAX, &[mntner("TEST-MNT", "TEST")]);
    harness.publisher.publish(harness.clock.utc());

    let outcome = harness.client().run().await.expect("run");

    assert_eq!(
        outcome,
        Nrtm4ClientOutcome::Reloaded {
            version: u64::MAX,
            objects: 1,
            deltas: 0
        }
    );
}

#[rstest]
#[tokio::test]
async fn object_class_filter_limits_what_is_mirrored(mut harness: Harness) {
    harness.source.object_class_filter = Some(BTreeSet::from(["mntner".to_owned()]));
    harness.publish_initial();

    let outcome = harness.client().run().await.expect("run");

    assert!(matches!(outcome, Nrtm4ClientOutcome::Reloaded { objects: 1, .. }));
    assert_eq!(harness.object_keys(), vec!["mntner:TEST-MNT".to_owned()]);
    assert!(harness.database.journal("TEST").is_empty());
}

#[test]
fn history_keeps_only_references_still_in_range() {
    let previous = BTreeMap::from([
        (
            "delta-1".to_owned(),
            FileFingerprint {
                url: "a".to_owned(),
                hash: "1".repeat(64),
            },
        ),
        (
            "delta-4".to_owned(),
            FileFingerprint {
                url: "b".to_owned(),
                hash: "2".repeat(64),
            },
        ),
    ]);
    let reference = |version| FileReference {
        version,
        url: format!("file-{version}"),
        hash: "3".repeat(64),
    };
    let unf = UpdateNotificationFile {
        nrtm_version: 4,
        timestamp: fixed_now(),
        file_type: NrtmFileType::Notification,
        next_signing_key: None,
        source: "TEST".to_owned(),
        session_id: Uuid::nil(),
        version: 5,
        snapshot: reference(4),
        deltas: vec![reference(3), reference(4), reference(5)],
    };

    let merged = merge_history(Some(&previous), &unf);

    assert!(!merged.contains_key("delta-1"));
    assert_eq!(merged.get("delta-4").map(|fp| fp.url.as_str()), Some("file-4"));
    assert!(merged.contains_key("snapshot-4"));
    assert!(merged.contains_key("delta-3"));
}
