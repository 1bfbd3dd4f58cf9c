//! `DieselDatabaseHandler` against a live PostgreSQL database.
//!
//! Set `IRRD_MIRROR_TEST_DATABASE_URL` to run these tests; they are skipped
//! otherwise. Each test works on a freshly named source, so runs against a
//! shared database do not interfere.

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

use irrd_mirror::domain::ports::{DatabaseHandler, RpslParser};
use irrd_mirror::domain::{
    ClientStatus, DatabaseOperation, FileFingerprint, JournalEntryOrigin, SerialRange,
};
use irrd_mirror::outbound::persistence::{
    DbPool, DieselDatabaseHandler, PoolConfig, run_migrations,
};
use irrd_mirror::outbound::rpsl_text_parser::RpslTextParser;
use irrd_mirror::test_support::MutableClock;
use irrd_mirror::test_support::fixtures::{fixed_now, mntner};
use uuid::Uuid;

const URL_VAR: &str = "IRRD_MIRROR_TEST_DATABASE_URL";

struct TestContext {
    handler: DieselDatabaseHandler,
    source: String,
}

impl TestContext {
    fn parse(&self, name: &str) -> irrd_mirror::domain::RpslObject {
        RpslTextParser
            .parse(&mntner(name, &self.source))
            .expect("parse")
    }
}

async fn context() -> Option<TestContext> {
    let Ok(url) = env::var(URL_VAR) else {
        eprintln!("SKIP-TEST-CLUSTER: {URL_VAR} is not set");
        return None;
    };
    let migrate_url = url.clone();
    tokio::task::spawn_blocking(move || run_migrations(&migrate_url))
        .await
        .expect("migration task")
        .expect("migrations");
    let pool = DbPool::new(PoolConfig::new(url)).await.expect("pool");
    let clock = Arc::new(MutableClock::new(fixed_now()));
    Some(TestContext {
        handler: DieselDatabaseHandler::new(pool, clock),
        source: format!("T{}", Uuid::new_v4().simple()).to_ascii_uppercase(),
    })
}

#[tokio::test]
async fn committed_writes_are_journaled_in_order() {
    let Some(ctx) = context().await else { return };
    let mut txn = ctx.handler.begin().await.expect("begin");
    txn.upsert_rpsl_object(&ctx.parse("A-MNT"), JournalEntryOrigin::Mirror, Some(7))
        .await
        .expect("upsert");
    let existed = txn
        .delete_rpsl_object(&ctx.source, "mntner", "A-MNT", JournalEntryOrigin::Mirror, Some(8))
        .await
        .expect("delete");
    assert!(existed);
    txn.upsert_rpsl_object(&ctx.parse("B-MNT"), JournalEntryOrigin::Mirror, Some(9))
        .await
        .expect("upsert");
    txn.commit().await.expect("commit");

    let journal = ctx
        .handler
        .journal_entries(&ctx.source, SerialRange::from(1))
        .await
        .expect("journal");
    let summary: Vec<_> = journal
        .iter()
        .map(|entry| (entry.serial_global, entry.operation, entry.serial_nrtm))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, DatabaseOperation::AddOrUpdate, Some(7)),
            (2, DatabaseOperation::Delete, Some(8)),
            (3, DatabaseOperation::AddOrUpdate, Some(9)),
        ]
    );
    let status = ctx
        .handler
        .status_for(&ctx.source)
        .await
        .expect("status")
        .expect("status row");
    assert_eq!(status.serial_oldest_journal, Some(1));
    assert_eq!(status.serial_newest_journal, Some(3));
}

#[tokio::test]
async fn rollback_discards_objects_and_journal() {
    let Some(ctx) = context().await else { return };
    let mut txn = ctx.handler.begin().await.expect("begin");
    txn.upsert_rpsl_object(&ctx.parse("A-MNT"), JournalEntryOrigin::Unknown, None)
        .await
        .expect("upsert");
    txn.rollback().await.expect("rollback");

    let mut txn = ctx.handler.begin().await.expect("begin");
    let objects = txn.objects_for_source(&ctx.source).await.expect("objects");
    txn.rollback().await.expect("rollback");
    assert!(objects.is_empty());
    assert!(
        ctx.handler
            .journal_entries(&ctx.source, SerialRange::from(1))
            .await
            .expect("journal")
            .is_empty()
    );
}

#[tokio::test]
async fn disabled_journaling_writes_objects_only() {
    let Some(ctx) = context().await else { return };
    let mut txn = ctx.handler.begin().await.expect("begin");
    txn.disable_journaling();
    txn.upsert_rpsl_object(&ctx.parse("A-MNT"), JournalEntryOrigin::Unknown, None)
        .await
        .expect("upsert");
    txn.update_serial_newest_mirror(&ctx.source, 42)
        .await
        .expect("mirror serial");
    txn.commit().await.expect("commit");

    let status = ctx
        .handler
        .status_for(&ctx.source)
        .await
        .expect("status")
        .expect("status row");
    assert_eq!(status.serial_newest_mirror, Some(42));
    assert_eq!(status.serial_newest_journal, None);
    let mut txn = ctx.handler.begin().await.expect("begin");
    assert_eq!(txn.objects_for_source(&ctx.source).await.expect("objects").len(), 1);
    txn.rollback().await.expect("rollback");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_get_gapless_serials() {
    let Some(ctx) = context().await else { return };
    let ctx = Arc::new(ctx);
    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                for index in 0..10 {
                    let object = ctx.parse(&format!("W{writer}-{index}-MNT"));
                    let mut txn = ctx.handler.begin().await.expect("begin");
                    txn.upsert_rpsl_object(&object, JournalEntryOrigin::Unknown, None)
                        .await
                        .expect("upsert");
                    txn.commit().await.expect("commit");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("writer");
    }

    let serials: Vec<u64> = ctx
        .handler
        .journal_entries(&ctx.source, SerialRange::from(1))
        .await
        .expect("journal")
        .iter()
        .map(|entry| entry.serial_global)
        .collect();
    assert_eq!(serials, (1..=40).collect::<Vec<u64>>());
}

#[tokio::test]
async fn client_status_and_errors_persist() {
    let Some(ctx) = context().await else { return };
    let client = ClientStatus {
        session_id: Uuid::new_v4(),
        version: 4,
        current_key: Some("current".to_owned()),
        next_key: None,
        previous_file_hashes: BTreeMap::from([(
            "snapshot-3".to_owned(),
            FileFingerprint {
                url: "nrtm-snapshot.3.json.gz".to_owned(),
                hash: "ab".repeat(32),
            },
        )]),
    };
    let mut txn = ctx.handler.begin().await.expect("begin");
    txn.update_client_status(&ctx.source, Some(&client))
        .await
        .expect("client status");
    txn.set_force_reload(&ctx.source, true).await.expect("force reload");
    txn.commit().await.expect("commit");
    ctx.handler
        .record_mirror_error(&ctx.source, "remote went away")
        .await
        .expect("record error");

    let status = ctx
        .handler
        .status_for(&ctx.source)
        .await
        .expect("status")
        .expect("status row");
    assert_eq!(status.nrtm4_client, Some(client));
    assert!(status.force_reload);
    assert_eq!(status.last_error.as_deref(), Some("remote went away"));
    assert_eq!(status.last_error_timestamp, Some(fixed_now()));
}
