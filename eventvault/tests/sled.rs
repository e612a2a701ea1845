#![cfg(feature = "sled-storage")]
//! The sled-backed stores behave like the in-memory ones and survive a
//! reopen.

mod common;

use std::sync::Arc;

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use uuid::Uuid;

use eventvault::{
    Error, EventStore, GenericRepository, Repository, Snapshot, SnapshotOutcome, SnapshotStore,
    store::{sled::SledEventStore, sled_snapshot::SledSnapshotStore},
};

use common::{Account, deposit, fixed_time, opened, processor, stored};

type SledRepository =
    GenericRepository<Account, SledEventStore<Account>, SledSnapshotStore<Account>>;

fn open(dir: &TempDir, snapshot_frequency: Option<u64>) -> (sled::Db, SledRepository) {
    let db = sled::open(dir.path()).expect("open sled");
    let events = Arc::new(SledEventStore::new(db.clone()));
    let snapshots = Arc::new(SledSnapshotStore::new(
        db.open_tree("snapshots").expect("snapshot tree"),
    ));
    let repo = GenericRepository::new(events, Some(snapshots), processor())
        .with_snapshot_frequency(snapshot_frequency);
    (db, repo)
}

#[test]
fn appends_are_version_checked() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let store = SledEventStore::<Account>::new(db);
    let id = Uuid::new_v4();

    block_on(store.append(&id, 0, vec![stored(&id, 1, &opened())], 1)).unwrap();
    block_on(store.append(&id, 1, vec![stored(&id, 2, &deposit(3))], 2)).unwrap();

    let err = block_on(store.append(&id, 1, vec![stored(&id, 2, &deposit(9))], 2))
        .expect_err("stale");
    assert_eq!(
        err,
        Error::ConcurrencyConflict {
            id: id.to_string(),
            expected: 1,
            actual: 2,
        }
    );

    let history = block_on(store.load_all(&id)).unwrap();
    let versions: Vec<_> = history.iter().map(|e| e.version()).collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(block_on(store.load_since(&id, 1)).unwrap().len(), 1);
    assert_eq!(block_on(store.current_version(&Uuid::new_v4())).unwrap(), 0);
}

#[test]
fn history_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let id = Uuid::new_v4();

    {
        let (db, repo) = open(&dir, Some(2));
        let mut account = repo.create(id).unwrap();
        account.raise(opened()).unwrap();
        account.raise(deposit(4)).unwrap();
        let outcome = block_on(repo.save(&mut account)).unwrap();
        assert_eq!(outcome.snapshot, SnapshotOutcome::Stored(2));
        account.raise(deposit(6)).unwrap();
        block_on(repo.save(&mut account)).unwrap();
        db.flush().unwrap();
    }

    let (_db, repo) = open(&dir, Some(2));
    let account = block_on(repo.load(&id)).unwrap();
    assert_eq!(account.version(), 3);
    assert_eq!(account.state().balance, 10);
    assert_eq!(account.state().applied, 1, "replayed only the tail after version 2");
}

#[test]
fn snapshots_only_move_forward() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let store = SledSnapshotStore::<Account>::new(db.open_tree("snapshots").unwrap());
    let id = Uuid::new_v4();
    let snapshot = |version| Snapshot::new(id.to_string(), version, fixed_time(), b"{}".to_vec());

    block_on(store.store(snapshot(5))).unwrap();
    assert!(block_on(store.store(snapshot(5))).unwrap_err().is_conflict());
    assert!(block_on(store.store(snapshot(4))).unwrap_err().is_conflict());
    block_on(store.store(snapshot(8))).unwrap();
    assert_eq!(block_on(store.find_latest(&id)).unwrap().unwrap().version(), 8);

    block_on(store.remove(&id)).unwrap();
    assert!(block_on(store.find_latest(&id)).unwrap().is_none());
}

#[test]
fn removed_stream_is_unknown() {
    let dir = TempDir::new().unwrap();
    let (db, repo) = open(&dir, None);
    let id = Uuid::new_v4();

    let mut account = repo.create(id).unwrap();
    account.raise(opened()).unwrap();
    block_on(repo.save(&mut account)).unwrap();

    let events = SledEventStore::<Account>::new(db);
    block_on(events.remove(&id)).unwrap();
    assert_eq!(
        block_on(repo.load(&id)).unwrap_err(),
        Error::UnknownIdentity(id.to_string())
    );
}

#[test]
fn reading_unknown_identities_creates_no_trees() {
    let dir = TempDir::new().unwrap();
    let (db, repo) = open(&dir, None);
    let events = SledEventStore::<Account>::new(db.clone());
    let trees_before = db.tree_names().len();

    for _ in 0..3 {
        let id = Uuid::new_v4();
        assert_eq!(block_on(events.current_version(&id)).unwrap(), 0);
        assert!(block_on(events.load_all(&id)).unwrap().is_empty());
        assert_eq!(
            block_on(repo.load(&id)).unwrap_err(),
            Error::UnknownIdentity(id.to_string())
        );
        let name = format!("events/{id}");
        assert!(
            !db.tree_names()
                .iter()
                .any(|existing| existing.as_ref() == name.as_bytes())
        );
    }
    assert_eq!(db.tree_names().len(), trees_before);

    let id = Uuid::new_v4();
    block_on(events.append(&id, 0, vec![stored(&id, 1, &opened())], 1)).unwrap();
    assert_eq!(db.tree_names().len(), trees_before + 1);
    assert_eq!(block_on(events.current_version(&id)).unwrap(), 1);
}
