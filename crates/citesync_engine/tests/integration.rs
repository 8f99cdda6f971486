//! End-to-end cycles: real sessions against a real in-process server.

use citesync_core::{MemoryCheckpointStore, Record};
use citesync_engine::{
    ConflictContext, ItemStore, LibraryStore, Resolution, RetryConfig, SyncClient, SyncConfig,
    SyncError, SyncResult, SyncTransport,
};
use citesync_protocol::{
    ChangeNotification, ItemId, ItemUpdate, PullRequest, PullResponse, PushRequest, PushResponse,
};
use citesync_server::SyncServer;
use parking_lot::Mutex;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transport calling straight into a shared server.
struct InMemoryTransport {
    server: Arc<SyncServer>,
}

impl SyncTransport for InMemoryTransport {
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        Ok(self.server.handle_pull(request))
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        Ok(self.server.handle_push(request))
    }

    fn subscribe(&self) -> SyncResult<Receiver<ChangeNotification>> {
        Ok(self.server.subscribe())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) {}
}

/// Transport that lands another client's push between one pull and the
/// following push of the same cycle.
struct RacingTransport {
    server: Arc<SyncServer>,
    racing_push: Mutex<Option<PushRequest>>,
}

impl SyncTransport for RacingTransport {
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        let response = self.server.handle_pull(request);
        if let Some(racing) = self.racing_push.lock().take() {
            self.server.handle_push(&racing);
        }
        Ok(response)
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        Ok(self.server.handle_push(request))
    }

    fn subscribe(&self) -> SyncResult<Receiver<ChangeNotification>> {
        Ok(self.server.subscribe())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) {}
}

type Client = SyncClient<InMemoryTransport, LibraryStore, MemoryCheckpointStore>;

fn quick_config() -> SyncConfig {
    SyncConfig::new("memory://server").with_retry(
        RetryConfig::new(2)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO),
    )
}

fn make_client(
    server: &Arc<SyncServer>,
) -> (Client, Arc<LibraryStore>, Arc<MemoryCheckpointStore>) {
    let store = Arc::new(LibraryStore::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let transport = Arc::new(InMemoryTransport {
        server: Arc::clone(server),
    });
    let client = SyncClient::new(
        quick_config(),
        transport,
        Arc::clone(&store),
        Arc::clone(&checkpoints),
    );
    (client, store, checkpoints)
}

fn paper(title: &str) -> Record {
    Record::new("article")
        .with_field("title", title)
        .with_field("author", "Lamport")
}

fn snapshot(store: &LibraryStore) -> Vec<(ItemId, u64, Record)> {
    store.read(|library| {
        let mut items: Vec<_> = library
            .iter()
            .map(|(_, entry)| {
                (
                    entry.meta.id.unwrap(),
                    entry.meta.revision.unwrap(),
                    entry.record.clone(),
                )
            })
            .collect();
        items.sort_by_key(|(id, _, _)| *id);
        items
    })
}

#[test]
fn two_clients_converge() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Time, Clocks"));
        library.insert(paper("The Part-Time Parliament"));
    });

    let report = alice.sync().unwrap();
    assert_eq!(report.pushed, 2);
    assert_eq!(server.live_items(), 2);

    let report = bob.sync().unwrap();
    assert_eq!(report.pulled, 2);
    assert_eq!(snapshot(&alice_store), snapshot(&bob_store));
}

#[test]
fn bidirectional_edits_on_distinct_items_converge() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Paxos Made Simple"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();

    bob_store.write(|library| {
        library.insert(paper("Byzantine Generals"));
    });
    bob.sync().unwrap();

    // Alice edits her item while pulling in Bob's new one.
    alice_store.write(|library| {
        let (key, _) = library.iter().next().map(|(k, e)| (k, e.clone())).unwrap();
        library
            .edit(key, |record| {
                record.set_field("year", "2001");
            })
            .unwrap();
    });
    alice.sync().unwrap();
    bob.sync().unwrap();

    let alice_items = snapshot(&alice_store);
    assert_eq!(alice_items.len(), 2);
    assert_eq!(alice_items, snapshot(&bob_store));
}

#[test]
fn pagination_converges_with_small_batches() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);

    alice_store.write(|library| {
        for i in 0..7 {
            library.insert(paper(&format!("Paper {i}")));
        }
    });
    alice.sync().unwrap();

    let store = Arc::new(LibraryStore::new());
    let bob = SyncClient::new(
        quick_config().with_pull_batch_size(2),
        Arc::new(InMemoryTransport {
            server: Arc::clone(&server),
        }),
        Arc::clone(&store),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let report = bob.sync().unwrap();
    assert_eq!(report.pulled, 7);
    assert_eq!(snapshot(&alice_store), snapshot(&store));
}

#[test]
fn deletion_propagates_to_other_clients() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Retired Paper"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();
    assert_eq!(bob_store.read(|l| l.len()), 1);

    alice_store.write(|library| {
        let key = library.iter().next().map(|(k, _)| k).unwrap();
        library.delete(key).unwrap();
    });
    let report = alice.sync().unwrap();
    assert_eq!(report.pushed, 1);
    assert!(alice_store.pending_tombstones().is_empty());

    bob.sync().unwrap();
    assert!(bob_store.read(|l| l.is_empty()));
    // The shared deletion leaves no pending tombstone behind on Bob.
    assert!(bob_store.pending_tombstones().is_empty());
}

#[test]
fn concurrent_edit_conflict_keep_local_wins_next_cycle() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Contended"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();
    let id = snapshot(&alice_store)[0].0;

    // Bob lands his edit first, moving the server to revision 2.
    bob_store.write(|library| {
        let key = library.key_of(&id).unwrap();
        library
            .edit(key, |r| {
                r.set_field("note", "bob's version");
            })
            .unwrap();
    });
    bob.sync().unwrap();
    assert_eq!(server.item(&id).unwrap().revision, 2);

    // Alice edited concurrently from revision 1 and keeps her version.
    alice_store.write(|library| {
        let key = library.key_of(&id).unwrap();
        library
            .edit(key, |r| {
                r.set_field("note", "alice's version");
            })
            .unwrap();
    });
    let alice = alice.with_resolver(Arc::new(|_: &ConflictContext| {
        Some(Resolution::KeepLocal)
    }));

    let report = alice.sync().unwrap();
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(report.pushed, 1);
    assert_eq!(server.item(&id).unwrap().revision, 3);

    alice_store.read(|library| {
        let entry = library.get_by_id(&id).unwrap();
        assert_eq!(entry.record.field("note"), Some("alice's version"));
        assert_eq!(entry.meta.revision, Some(3));
        assert!(!entry.meta.dirty);
    });

    // Bob pulls Alice's winning version.
    bob.sync().unwrap();
    bob_store.read(|library| {
        let entry = library.get_by_id(&id).unwrap();
        assert_eq!(entry.record.field("note"), Some("alice's version"));
    });
}

#[test]
fn delete_versus_edit_conflict_accepts_remote_edit() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Disputed"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();
    let id = snapshot(&alice_store)[0].0;

    // Bob edits; Alice deletes while behind.
    bob_store.write(|library| {
        let key = library.key_of(&id).unwrap();
        library
            .edit(key, |r| {
                r.set_field("note", "still relevant");
            })
            .unwrap();
    });
    bob.sync().unwrap();

    alice_store.write(|library| {
        let key = library.key_of(&id).unwrap();
        library.delete(key).unwrap();
    });
    let alice = alice.with_resolver(Arc::new(|context: &ConflictContext| {
        assert!(context.local_deleted());
        Some(Resolution::AcceptRemote)
    }));

    let report = alice.sync().unwrap();
    assert_eq!(report.conflicts_resolved, 1);
    alice_store.read(|library| {
        let entry = library.get_by_id(&id).unwrap();
        assert_eq!(entry.record.field("note"), Some("still relevant"));
        assert!(!entry.meta.dirty);
    });
    assert!(alice_store.pending_tombstones().is_empty());
}

#[test]
fn replaying_a_stale_checkpoint_is_harmless() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, bob_checkpoints) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("First"));
        library.insert(paper("Second"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();
    let converged = snapshot(&bob_store);

    // Simulate a crash after merging but before the checkpoint write:
    // rewind to the origin and run the whole stream again.
    bob_checkpoints.reset(None);
    let report = bob.sync().unwrap();
    assert_eq!(report.pulled, 2);
    assert_eq!(snapshot(&bob_store), converged);
}

#[test]
fn notification_wakes_a_listening_client() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);
    let bob = Arc::new(bob);

    let runner = {
        let bob = Arc::clone(&bob);
        std::thread::spawn(move || bob.run_until_cancelled())
    };

    alice_store.write(|library| {
        library.insert(paper("Breaking News"));
    });
    alice.sync().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while bob_store.read(|l| l.is_empty()) {
        assert!(Instant::now() < deadline, "change never reached listener");
        std::thread::sleep(Duration::from_millis(10));
    }

    bob.cancel();
    runner.join().unwrap().unwrap();
    assert_eq!(snapshot(&alice_store), snapshot(&bob_store));
}

#[test]
fn identical_concurrent_edits_converge_without_conflict() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Shared"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();
    let id = snapshot(&alice_store)[0].0;

    // Both sides apply the same edit; Alice lands hers first.
    for store in [&alice_store, &bob_store] {
        store.write(|library| {
            let key = library.key_of(&id).unwrap();
            library
                .edit(key, |r| {
                    r.set_field("year", "2020");
                })
                .unwrap();
        });
    }
    alice.sync().unwrap();
    assert_eq!(server.item(&id).unwrap().revision, 2);

    // Bob's copy matches the server byte for byte, so nothing to argue
    // about and nothing left to push.
    let report = bob.sync().unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(report.parked, 0);
    assert_eq!(report.conflicts_resolved, 0);
    assert_eq!(report.pushed, 0);
    assert_eq!(server.item(&id).unwrap().revision, 2);
    assert_eq!(snapshot(&alice_store), snapshot(&bob_store));
    bob_store.read(|library| {
        let entry = library.get_by_id(&id).unwrap();
        assert_eq!(entry.meta.revision, Some(2));
        assert!(!entry.meta.dirty);
    });
}

#[test]
fn concurrent_deletions_converge_silently() {
    let server = Arc::new(SyncServer::new());
    let (alice, alice_store, _) = make_client(&server);
    let (bob, bob_store, _) = make_client(&server);

    alice_store.write(|library| {
        library.insert(paper("Doomed"));
    });
    alice.sync().unwrap();
    bob.sync().unwrap();
    let id = snapshot(&alice_store)[0].0;

    for store in [&alice_store, &bob_store] {
        store.write(|library| {
            let key = library.key_of(&id).unwrap();
            library.delete(key).unwrap();
        });
    }
    alice.sync().unwrap();

    // Bob pulls the server tombstone and drops his own instead of
    // pushing it into a revision check it can never pass.
    let report = bob.sync().unwrap();
    assert_eq!(report.rejected, 0);
    assert_eq!(report.pushed, 0);
    assert!(bob_store.pending_tombstones().is_empty());

    let report = bob.sync().unwrap();
    assert_eq!(report.rejected, 0);
}

#[test]
fn rejected_push_converges_on_a_later_cycle() {
    let server = Arc::new(SyncServer::new());
    let seed = paper("Contended").to_payload().unwrap();
    let accepted = server
        .handle_push(&PushRequest::new(vec![ItemUpdate::create(1, seed)], vec![]))
        .accepted[0];
    let id = accepted.id;

    let transport = Arc::new(RacingTransport {
        server: Arc::clone(&server),
        racing_push: Mutex::new(None),
    });
    let store = Arc::new(LibraryStore::new());
    let client = SyncClient::new(
        quick_config(),
        Arc::clone(&transport),
        Arc::clone(&store),
        Arc::new(MemoryCheckpointStore::new()),
    )
    .with_resolver(Arc::new(|_: &ConflictContext| Some(Resolution::KeepLocal)));

    client.sync().unwrap();
    store.write(|library| {
        let key = library.key_of(&id).unwrap();
        library
            .edit(key, |r| {
                r.set_field("note", "local");
            })
            .unwrap();
    });

    // A rival update lands on the server between this cycle's pull and
    // its push, so the push arrives with a stale base revision.
    let racing = paper("Contended")
        .with_field("note", "racer")
        .to_payload()
        .unwrap();
    *transport.racing_push.lock() = Some(PushRequest::new(
        vec![ItemUpdate::update(1, id, 1, racing)],
        vec![],
    ));

    let first = client.sync().unwrap();
    assert_eq!(first.rejected, 1);
    assert_eq!(server.item(&id).unwrap().revision, 2);
    store.read(|library| {
        let entry = library.get_by_id(&id).unwrap();
        assert!(entry.meta.dirty);
        assert_eq!(entry.meta.revision, Some(1));
    });

    // The next cycle pulls the rival revision, resolves in favour of
    // the local edit and lands it on a fresh base.
    let second = client.sync().unwrap();
    assert_eq!(second.conflicts_resolved, 1);
    assert_eq!(second.pushed, 1);
    assert_eq!(second.rejected, 0);
    assert_eq!(server.item(&id).unwrap().revision, 3);
    store.read(|library| {
        let entry = library.get_by_id(&id).unwrap();
        assert_eq!(entry.record.field("note"), Some("local"));
        assert_eq!(entry.meta.revision, Some(3));
        assert!(!entry.meta.dirty);
    });
}

#[test]
fn revision_regression_is_a_fatal_fault() {
    let server = Arc::new(SyncServer::new());
    let (client, store, _) = make_client(&server);

    // The server holds the item at revision 1, but local metadata
    // claims revision 9, as after a server restore from old backups.
    let payload = paper("Regressed").to_payload().unwrap();
    let accepted = server
        .handle_push(&PushRequest::new(vec![ItemUpdate::create(1, payload)], vec![]))
        .accepted[0];
    store.write(|library| {
        let key = library.insert(paper("Regressed"));
        library.confirm_update(key, accepted.id, 9).unwrap();
    });

    let err = client.sync().unwrap_err();
    assert!(matches!(err, SyncError::RevisionRegression { .. }));
    assert!(err.is_fatal());
}
