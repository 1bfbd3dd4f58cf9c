//! A published NRTM v4 source followed by a client, end to end.
//!
//! The server writer publishes into an in-memory directory, which is then
//! served to the client through an in-memory remote. Both sides share one
//! clock so notification files are always fresh.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use irrd_mirror::domain::nrtm4::{
    Nrtm4Client, Nrtm4ClientOutcome, Nrtm4ClientPorts, Nrtm4ServerKeys, Nrtm4ServerOutcome,
    Nrtm4ServerPorts, Nrtm4ServerWriter, UNF_FILENAME,
};
use irrd_mirror::domain::ports::{DatabaseHandler, RpslParser};
use irrd_mirror::domain::{
    JournalEntryOrigin, LeaseRegistry, MirrorErrorKind, Nrtm4ClientConfig, Nrtm4ServerConfig,
    SourceConfig,
};
use irrd_mirror::outbound::memory::MemoryDatabase;
use irrd_mirror::outbound::rpsl_text_parser::RpslTextParser;
use irrd_mirror::test_support::MutableClock;
use irrd_mirror::test_support::fixtures::{
    fixed_now, mntner, person, public_pem, route, signing_key,
};
use irrd_mirror::test_support::remote::{MemoryPublication, MemoryRemote};
use rstest::{fixture, rstest};
use url::Url;

struct World {
    clock: Arc<MutableClock>,
    origin: MemoryDatabase,
    mirror: MemoryDatabase,
    directory: Arc<MemoryPublication>,
    remote: Arc<MemoryRemote>,
    leases: Arc<LeaseRegistry>,
    base: Url,
}

impl World {
    fn writer(&self, current: SigningKey, next: Option<SigningKey>) -> Nrtm4ServerWriter {
        Nrtm4ServerWriter::new(
            Arc::new(SourceConfig::new("TEST")),
            Nrtm4ServerConfig {
                private_key_path: "unused".into(),
                next_private_key_path: None,
                local_path: "unused".into(),
                snapshot_interval: Duration::from_secs(4 * 3600),
            },
            Nrtm4ServerKeys { current, next },
            Nrtm4ServerPorts {
                database: Arc::new(self.origin.clone()),
                directory: self.directory.clone(),
                leases: Arc::clone(&self.leases),
                clock: self.clock.clone(),
            },
        )
    }

    fn client(&self) -> Nrtm4Client {
        Nrtm4Client::new(
            Arc::new(SourceConfig::new("TEST")),
            Nrtm4ClientConfig {
                notification_file_url: self.base.join(UNF_FILENAME).expect("notification url"),
                initial_public_key: public_pem(&signing_key(1)),
            },
            Nrtm4ClientPorts {
                database: Arc::new(self.mirror.clone()),
                retriever: self.remote.clone(),
                parser: Arc::new(RpslTextParser),
                clock: self.clock.clone(),
            },
        )
    }

    async fn publish(&self, current: SigningKey, next: Option<SigningKey>) -> Nrtm4ServerOutcome {
        let outcome = self.writer(current, next).run().await.expect("publish");
        self.directory.serve_on(&self.remote, &self.base);
        outcome
    }

    async fn upsert(&self, text: &str) {
        let object = RpslTextParser.parse(text).expect("parse");
        let mut txn = self.origin.begin().await.expect("begin");
        txn.upsert_rpsl_object(&object, JournalEntryOrigin::Unknown, None)
            .await
            .expect("upsert");
        txn.commit().await.expect("commit");
    }

    async fn delete(&self, object_class: &str, pk: &str) {
        let mut txn = self.origin.begin().await.expect("begin");
        txn.delete_rpsl_object("TEST", object_class, pk, JournalEntryOrigin::Unknown, None)
            .await
            .expect("delete");
        txn.commit().await.expect("commit");
    }

    fn keys(database: &MemoryDatabase) -> Vec<String> {
        database
            .objects("TEST")
            .into_iter()
            .map(|object| format!("{}:{}", object.object_class, object.pk))
            .collect()
    }
}

#[fixture]
fn world() -> World {
    let clock = Arc::new(MutableClock::new(fixed_now()));
    World {
        origin: MemoryDatabase::new(clock.clone()),
        mirror: MemoryDatabase::new(clock.clone()),
        directory: Arc::new(MemoryPublication::new(clock.clone())),
        remote: Arc::new(MemoryRemote::default()),
        leases: Arc::new(LeaseRegistry::new()),
        base: Url::parse("https://nrtm.example.net/TEST/").expect("base url"),
        clock,
    }
}

#[rstest]
#[tokio::test]
async fn mirror_converges_on_published_source(world: World) {
    world.upsert(&mntner("TEST-MNT", "TEST")).await;
    world.upsert(&route("192.0.2.0/24", "AS65530", "TEST")).await;
    world.publish(signing_key(1), None).await;

    let first = world.client().run().await.expect("initial sync");
    assert_eq!(
        first,
        Nrtm4ClientOutcome::Reloaded {
            version: 1,
            objects: 2,
            deltas: 0
        }
    );

    world.clock.advance_hours(1);
    world.upsert(&person("A Person", "AP1-TEST", "TEST")).await;
    world.delete("route", "192.0.2.0/24AS65530").await;
    let outcome = world.publish(signing_key(1), None).await;
    assert!(matches!(
        outcome,
        Nrtm4ServerOutcome::Published {
            version: 2,
            new_delta: true,
            ..
        }
    ));

    let second = world.client().run().await.expect("delta sync");
    assert_eq!(second, Nrtm4ClientOutcome::Updated { version: 2, deltas: 1 });
    assert_eq!(World::keys(&world.mirror), World::keys(&world.origin));

    let third = world.client().run().await.expect("idle sync");
    assert_eq!(third, Nrtm4ClientOutcome::UpToDate { version: 2 });
}

#[rstest]
#[tokio::test]
async fn tampered_delta_is_rejected_without_changes(world: World) {
    world.upsert(&mntner("TEST-MNT", "TEST")).await;
    world.publish(signing_key(1), None).await;
    world.client().run().await.expect("initial sync");

    world.clock.advance_hours(1);
    world.upsert(&mntner("OTHER-MNT", "TEST")).await;
    world.publish(signing_key(1), None).await;
    let delta = world
        .directory
        .names()
        .into_iter()
        .find(|name| name.starts_with("nrtm-delta.2."))
        .expect("delta file");
    world
        .remote
        .insert(world.base.join(&delta).expect("delta url"), b"not the delta".to_vec());

    let err = world.client().run().await.expect_err("tampered");

    assert_eq!(err.kind(), MirrorErrorKind::Integrity);
    assert_eq!(World::keys(&world.mirror), vec!["mntner:TEST-MNT".to_owned()]);
    let client = world
        .mirror
        .status("TEST")
        .and_then(|status| status.nrtm4_client)
        .expect("client status");
    assert_eq!(client.version, 1);
}

#[rstest]
#[tokio::test]
async fn announced_key_rotation_is_followed(world: World) {
    world.upsert(&mntner("TEST-MNT", "TEST")).await;
    world.publish(signing_key(1), Some(signing_key(2))).await;
    world.client().run().await.expect("initial sync");
    let client = world
        .mirror
        .status("TEST")
        .and_then(|status| status.nrtm4_client)
        .expect("client status");
    assert_eq!(client.next_key, Some(public_pem(&signing_key(2))));

    world.clock.advance_hours(1);
    world.upsert(&mntner("OTHER-MNT", "TEST")).await;
    world.publish(signing_key(2), None).await;

    world.client().run().await.expect("rotated sync");

    let client = world
        .mirror
        .status("TEST")
        .and_then(|status| status.nrtm4_client)
        .expect("client status");
    assert_eq!(client.current_key, Some(public_pem(&signing_key(2))));
    assert!(client.next_key.is_none());
    assert_eq!(World::keys(&world.mirror).len(), 2);
}

#[rstest]
#[tokio::test]
async fn unannounced_key_is_not_trusted(world: World) {
    world.upsert(&mntner("TEST-MNT", "TEST")).await;
    world.publish(signing_key(1), None).await;
    world.client().run().await.expect("initial sync");

    world.clock.advance_hours(1);
    world.upsert(&mntner("OTHER-MNT", "TEST")).await;
    world.publish(signing_key(9), None).await;

    let err = world.client().run().await.expect_err("untrusted key");

    assert_eq!(err.kind(), MirrorErrorKind::Trust);
    assert_eq!(World::keys(&world.mirror), vec!["mntner:TEST-MNT".to_owned()]);
}
