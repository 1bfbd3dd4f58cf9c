//! Journal serials stay gapless while many writers commit concurrently.

use std::sync::Arc;

use irrd_mirror::domain::ports::{DatabaseHandler, RpslParser};
use irrd_mirror::domain::{JournalEntryOrigin, SerialRange};
use irrd_mirror::outbound::memory::MemoryDatabase;
use irrd_mirror::outbound::rpsl_text_parser::RpslTextParser;
use irrd_mirror::test_support::MutableClock;
use irrd_mirror::test_support::fixtures::{fixed_now, mntner};
use rstest::rstest;

const WRITERS: usize = 8;
const WRITES_PER_WRITER: usize = 25;

async fn write_objects(database: Arc<dyn DatabaseHandler>, writer: usize) {
    for index in 0..WRITES_PER_WRITER {
        let text = mntner(&format!("W{writer}-{index}-MNT"), "TEST");
        let object = RpslTextParser.parse(&text).expect("parse");
        let mut txn = database.begin().await.expect("begin");
        txn.upsert_rpsl_object(&object, JournalEntryOrigin::Unknown, None)
            .await
            .expect("upsert");
        tokio::task::yield_now().await;
        txn.commit().await.expect("commit");
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_receive_consecutive_serials() {
    let database = MemoryDatabase::new(Arc::new(MutableClock::new(fixed_now())));
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let database: Arc<dyn DatabaseHandler> = Arc::new(database.clone());
            tokio::spawn(write_objects(database, writer))
        })
        .collect();
    for handle in handles {
        handle.await.expect("writer task");
    }

    let entries = database
        .journal_entries("TEST", SerialRange::from(1))
        .await
        .expect("journal");
    let serials: Vec<u64> = entries.iter().map(|entry| entry.serial_global).collect();
    let expected: Vec<u64> = (1..=(WRITERS * WRITES_PER_WRITER) as u64).collect();
    assert_eq!(serials, expected);

    let status = database.status("TEST").expect("status");
    assert_eq!(status.serial_oldest_journal, Some(1));
    assert_eq!(status.serial_newest_journal, expected.last().copied());
}

#[rstest]
#[tokio::test]
async fn rolled_back_writes_leave_no_gap() {
    let database = MemoryDatabase::new(Arc::new(MutableClock::new(fixed_now())));
    let parse = |name: &str| RpslTextParser.parse(&mntner(name, "TEST")).expect("parse");

    let mut kept = database.begin().await.expect("begin");
    kept.upsert_rpsl_object(&parse("A-MNT"), JournalEntryOrigin::Unknown, None)
        .await
        .expect("upsert");
    let mut discarded = database.begin().await.expect("begin");
    discarded
        .upsert_rpsl_object(&parse("B-MNT"), JournalEntryOrigin::Unknown, None)
        .await
        .expect("upsert");
    discarded.rollback().await.expect("rollback");
    kept.commit().await.expect("commit");
    let mut later = database.begin().await.expect("begin");
    later
        .upsert_rpsl_object(&parse("C-MNT"), JournalEntryOrigin::Unknown, None)
        .await
        .expect("upsert");
    later.commit().await.expect("commit");

    let journal = database.journal("TEST");
    let serials: Vec<_> = journal
        .iter()
        .map(|entry| (entry.serial_global, entry.rpsl_pk.clone()))
        .collect();
    assert_eq!(
        serials,
        vec![(1, "A-MNT".to_owned()), (2, "C-MNT".to_owned())]
    );
}
