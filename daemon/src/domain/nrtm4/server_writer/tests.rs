//! NRTM v4 server writer runs against in-memory storage.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::domain::hashing::sha256_hex;
use crate::domain::journal::JournalEntryOrigin;
use crate::domain::mirror::end_published_session;
use crate::domain::nrtm4::files::DataFileReader;
use crate::domain::DummifyPolicy;
use crate::domain::ports::RpslParser;
use crate::domain::signature::verify_compact;
use crate::outbound::memory::MemoryDatabase;
use crate::outbound::rpsl_text_parser::RpslTextParser;
use crate::test_support::MutableClock;
use crate::test_support::fixtures::{fixed_now, mntner, person, public_pem, route, signing_key};
use crate::test_support::remote::MemoryPublication;

struct Harness {
    clock: Arc<MutableClock>,
    database: MemoryDatabase,
    directory: Arc<MemoryPublication>,
    leases: Arc<LeaseRegistry>,
    source: SourceConfig,
    next_key: Option<SigningKey>,
}

impl Harness {
    fn writer(&self) -> Nrtm4ServerWriter {
        let config = Nrtm4ServerConfig {
            private_key_path: PathBuf::from("unused"),
            next_private_key_path: None,
            local_path: PathBuf::from("unused"),
            snapshot_interval: Duration::from_secs(4 * 3600),
        };
        Nrtm4ServerWriter::new(
            Arc::new(self.source.clone()),
            config,
            Nrtm4ServerKeys {
                current: signing_key(1),
                next: self.next_key.clone(),
            },
            Nrtm4ServerPorts {
                database: Arc::new(self.database.clone()),
                directory: self.directory.clone(),
                leases: Arc::clone(&self.leases),
                clock: self.clock.clone(),
            },
        )
    }

    async fn upsert(&self, text: &str) {
        let object = RpslTextParser.parse(text).expect("parse");
        let mut txn = self.database.begin().await.expect("begin");
        txn.upsert_rpsl_object(&object, JournalEntryOrigin::Unknown, None)
            .await
            .expect("upsert");
        txn.commit().await.expect("commit");
    }

    async fn delete(&self, text: &str) {
        let object = RpslTextParser.parse(text).expect("parse");
        let mut txn = self.database.begin().await.expect("begin");
        txn.delete_rpsl_object(
            &object.source,
            &object.object_class,
            &object.pk,
            JournalEntryOrigin::Unknown,
            None,
        )
        .await
        .expect("delete");
        txn.commit().await.expect("commit");
    }

    fn server_status(&self) -> ServerStatus {
        self.database
            .status("TEST")
            .and_then(|status| status.nrtm4_server)
            .expect("server status")
    }

    fn notification(&self) -> UpdateNotificationFile {
        let signed = self.directory.read(UNF_FILENAME).expect("notification file");
        let signed = String::from_utf8(signed).expect("utf-8");
        let payload = verify_compact(&signed, &signing_key(1).verifying_key()).expect("verify");
        serde_json::from_slice(&payload).expect("json")
    }

    fn read_file<T: serde::de::DeserializeOwned>(&self, name: &str) -> (DataFileHeader, Vec<T>) {
        let bytes = self.directory.read(name).expect("data file");
        let mut reader = DataFileReader::open(bytes.as_slice()).expect("open");
        let header = reader.header().clone();
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().expect("record") {
            records.push(record);
        }
        (header, records)
    }

    fn data_files(&self) -> Vec<String> {
        self.directory
            .names()
            .into_iter()
            .filter(|name| is_data_file_name(name))
            .collect()
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(MutableClock::new(fixed_now()));
    Harness {
        database: MemoryDatabase::new(clock.clone()),
        directory: Arc::new(MemoryPublication::new(clock.clone())),
        clock,
        leases: Arc::new(LeaseRegistry::new()),
        source: SourceConfig::new("TEST"),
        next_key: None,
    }
}

#[rstest]
#[tokio::test]
async fn first_run_publishes_snapshot_and_signed_notification(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.upsert(&route("192.0.2.0/24", "AS65530", "TEST")).await;

    let outcome = harness.writer().run().await.expect("run");

    let status = harness.server_status();
    assert_eq!(
        outcome,
        Nrtm4ServerOutcome::Published {
            session_id: status.session_id,
            version: 1,
            new_delta: false,
            new_snapshot: true,
            signed: true,
        }
    );
    assert_eq!(status.snapshot.global_serial, 2);
    assert!(status.deltas.is_empty());

    let unf = harness.notification();
    unf.validate("TEST", harness.clock.utc()).expect("valid notification");
    assert_eq!(unf.session_id, status.session_id);
    assert_eq!(unf.snapshot.url, status.snapshot.filename);
    let snapshot_bytes = harness.directory.read(&unf.snapshot.url).expect("snapshot");
    assert_eq!(unf.snapshot.hash, sha256_hex(&snapshot_bytes));

    let (header, objects): (_, Vec<SnapshotObject>) = harness.read_file(&unf.snapshot.url);
    header
        .validate(NrtmFileType::Snapshot, "TEST", status.session_id, 1)
        .expect("header");
    assert_eq!(objects.len(), 2);
    let maintainer = objects
        .iter()
        .find(|record| record.object.starts_with("mntner"))
        .expect("maintainer");
    assert!(maintainer.object.contains("DummyValue"), "{}", maintainer.object);
    assert!(!maintainer.object.contains("$2b$"), "auth hashes must not be published");
}

#[rstest]
#[tokio::test]
async fn idle_runs_keep_version_and_only_refresh_the_signature(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");
    let files = harness.data_files();

    let outcome = harness.writer().run().await.expect("idle run");
    assert!(matches!(
        outcome,
        Nrtm4ServerOutcome::Published {
            version: 1,
            new_delta: false,
            new_snapshot: false,
            signed: false,
            ..
        }
    ));
    assert_eq!(harness.data_files(), files);

    harness.clock.advance_hours(9);
    let outcome = harness.writer().run().await.expect("refresh run");
    assert!(matches!(
        outcome,
        Nrtm4ServerOutcome::Published {
            version: 1,
            new_delta: false,
            signed: true,
            ..
        }
    ));
    assert_eq!(harness.data_files(), files);
    assert_eq!(harness.notification().timestamp, harness.clock.utc());
    assert_eq!(harness.server_status().unf_timestamp, harness.clock.utc());
}

#[rstest]
#[tokio::test]
async fn journal_changes_become_contiguous_deltas(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");

    harness.upsert(&person("A Person", "AP1-TEST", "TEST")).await;
    harness.delete(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("delta run");
    harness.upsert(&route("192.0.2.0/24", "AS65530", "TEST")).await;
    harness.writer().run().await.expect("second delta run");

    let status = harness.server_status();
    assert_eq!(status.version, 3);
    let ranges: Vec<_> = status
        .deltas
        .iter()
        .map(|delta| (delta.version, delta.serial_start, delta.serial_end))
        .collect();
    assert_eq!(ranges, vec![(2, 2, 3), (3, 4, 4)]);

    let (header, changes): (_, Vec<DeltaChange>) = harness.read_file(&status.deltas[0].filename);
    assert_eq!(header.version, 2);
    assert!(matches!(&changes[0], DeltaChange::AddModify { object } if object.starts_with("person")));
    assert_eq!(
        changes[1],
        DeltaChange::Delete {
            object_class: "mntner".to_owned(),
            primary_key: "TEST-MNT".to_owned(),
        }
    );

    let unf = harness.notification();
    unf.validate("TEST", harness.clock.utc()).expect("valid");
    assert_eq!(unf.version, 3);
    assert_eq!(unf.deltas.len(), 2);
}

#[rstest]
#[tokio::test]
async fn snapshot_is_cut_once_the_interval_elapsed(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");

    harness.upsert(&mntner("OTHER-MNT", "TEST")).await;
    harness.clock.advance_hours(1);
    let outcome = harness.writer().run().await.expect("delta run");
    assert!(matches!(outcome, Nrtm4ServerOutcome::Published { new_snapshot: false, .. }));

    harness.clock.advance_hours(4);
    let outcome = harness.writer().run().await.expect("snapshot run");
    assert!(matches!(
        outcome,
        Nrtm4ServerOutcome::Published {
            version: 2,
            new_delta: false,
            new_snapshot: true,
            ..
        }
    ));
    let status = harness.server_status();
    assert_eq!(status.snapshot.version, 2);
    assert_eq!(status.snapshot.global_serial, 2);
    let (_, objects): (_, Vec<SnapshotObject>) = harness.read_file(&status.snapshot.filename);
    assert_eq!(objects.len(), 2);
}

#[rstest]
#[tokio::test]
async fn deltas_expire_once_covered_and_old(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");
    harness.upsert(&mntner("SECOND-MNT", "TEST")).await;
    harness.writer().run().await.expect("delta 2");
    let old_delta = harness.server_status().deltas[0].filename.clone();

    harness.clock.advance_hours(25);
    harness.upsert(&mntner("THIRD-MNT", "TEST")).await;
    harness.writer().run().await.expect("delta 3 and snapshot");

    let status = harness.server_status();
    assert_eq!(status.snapshot.version, 3);
    let versions: Vec<_> = status.deltas.iter().map(|delta| delta.version).collect();
    assert_eq!(versions, vec![3]);
    assert!(!harness.directory.names().contains(&old_delta));
    harness
        .notification()
        .validate("TEST", harness.clock.utc())
        .expect("valid after expiry");
}

#[rstest]
#[tokio::test]
async fn held_lease_skips_the_run(harness: Harness) {
    let _lease = harness
        .leases
        .try_acquire(&Nrtm4ServerWriter::lease_name("TEST"))
        .expect("lease");

    let outcome = harness.writer().run().await.expect("run");

    assert_eq!(outcome, Nrtm4ServerOutcome::LeaseHeld);
    assert!(harness.directory.names().is_empty());
}

#[rstest]
#[tokio::test]
async fn pending_force_reload_skips_publication(harness: Harness) {
    let mut txn = harness.database.begin().await.expect("begin");
    txn.set_force_reload("TEST", true).await.expect("flag");
    txn.commit().await.expect("commit");

    let outcome = harness.writer().run().await.expect("run");

    assert_eq!(outcome, Nrtm4ServerOutcome::ForceReloadPending);
    assert!(harness.directory.names().is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_published_file_starts_a_new_session(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");
    let first = harness.server_status();
    harness.directory.delete(&first.snapshot.filename);

    harness.writer().run().await.expect("recovery run");

    let second = harness.server_status();
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(second.version, 1);
    assert_eq!(harness.notification().session_id, second.session_id);
}

#[rstest]
#[tokio::test]
async fn full_reload_starts_a_new_session_with_a_fresh_snapshot(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");
    let first = harness.server_status();

    let mut txn = harness.database.begin().await.expect("begin");
    txn.delete_all_rpsl_objects("TEST", JournalEntryOrigin::Mirror)
        .await
        .expect("delete all");
    txn.disable_journaling();
    for text in [mntner("NEW-MNT", "TEST"), route("192.0.2.0/24", "AS65530", "TEST")] {
        let object = RpslTextParser.parse(&text).expect("parse");
        txn.upsert_rpsl_object(&object, JournalEntryOrigin::Mirror, None)
            .await
            .expect("upsert");
    }
    txn.enable_journaling();
    end_published_session(txn.as_mut(), "TEST").await.expect("end session");
    txn.commit().await.expect("commit");
    harness.clock.advance_hours(1);

    let outcome = harness.writer().run().await.expect("run after reload");

    let second = harness.server_status();
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(
        outcome,
        Nrtm4ServerOutcome::Published {
            session_id: second.session_id,
            version: 1,
            new_delta: false,
            new_snapshot: true,
            signed: true,
        }
    );
    let unf = harness.notification();
    assert!(unf.deltas.is_empty());
    let (_, objects): (_, Vec<SnapshotObject>) = harness.read_file(&unf.snapshot.url);
    assert_eq!(objects.len(), 2);
}

#[rstest]
#[tokio::test]
async fn notification_file_older_than_the_status_is_signed_again(harness: Harness) {
    harness.upsert(&mntner("TEST-MNT", "TEST")).await;
    harness.writer().run().await.expect("first run");
    let stale = harness.directory.read(UNF_FILENAME).expect("notification file");
    harness.clock.advance_hours(1);
    harness.upsert(&mntner("OTHER-MNT", "TEST")).await;
    harness.writer().run().await.expect("delta run");
    harness.directory.insert(UNF_FILENAME, stale, fixed_now());

    let outcome = harness.writer().run().await.expect("repair run");

    assert!(matches!(
        outcome,
        Nrtm4ServerOutcome::Published {
            version: 2,
            new_delta: false,
            new_snapshot: false,
            signed: true,
            ..
        }
    ));
    let unf = harness.notification();
    assert_eq!(unf.version, 2);
    assert_eq!(unf.timestamp, harness.server_status().unf_timestamp);
}

#[rstest]
#[tokio::test]
async fn only_old_unreferenced_data_files_are_swept(harness: Harness) {
    let now = harness.clock.utc();
    let stale = "nrtm-delta.9.00000000000000000000000000000000.json.gz";
    let fresh = "nrtm-delta.9.11111111111111111111111111111111.json.gz";
    harness.directory.insert(stale, b"x".to_vec(), now - TimeDelta::hours(2));
    harness.directory.insert(fresh, b"x".to_vec(), now - TimeDelta::minutes(10));
    harness.directory.insert("README", b"x".to_vec(), now - TimeDelta::hours(48));

    harness.writer().run().await.expect("run");

    let names = harness.directory.names();
    assert!(!names.contains(&stale.to_owned()));
    assert!(names.contains(&fresh.to_owned()));
    assert!(names.contains(&"README".to_owned()));
}

#[rstest]
#[tokio::test]
async fn announces_next_key_and_dummifies_objects(mut harness: Harness) {
    harness.next_key = Some(signing_key(2));
    harness.source.dummify = DummifyPolicy {
        object_classes: BTreeSet::from(["person".to_owned()]),
        attributes: BTreeMap::from([("address".to_owned(), "Dummy address for %s".to_owned())]),
        remarks: vec!["Dummified".to_owned()],
    };
    harness.upsert(&person("A Person", "AP1-TEST", "TEST")).await;

    harness.writer().run().await.expect("run");

    let unf = harness.notification();
    assert_eq!(
        unf.next_signing_key,
        Some(public_pem(&signing_key(2)))
    );
    let (_, objects): (_, Vec<SnapshotObject>) = harness.read_file(&unf.snapshot.url);
    let text = &objects[0].object;
    assert!(text.contains("Dummy address for AP1-TEST"), "{text}");
    assert!(text.contains("remarks:        Dummified"), "{text}");
}
