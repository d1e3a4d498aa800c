/// Concurrent use of the shared pending-delete registry: many workers add
/// and remove in parallel, and each worker's local list must stay in step
/// with its registry mirrors.
use rand::Rng;
use relstore::{Persistence, RelFileId, RelFileRef, SharedRegistry, StorageEngine, StorageKind};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn rel(relnumber: u32) -> RelFileRef {
    RelFileRef::new(RelFileId::new(1663, 16384, relnumber), false, StorageKind::Standard)
}

#[test]
fn test_concurrent_adds_all_land() {
    let registry = Arc::new(SharedRegistry::new(4096));
    let threads = 8;
    let per_thread = 100u32;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let relnumber = (t as u32) * per_thread + i;
                    registry.add(rel(relnumber), t as u64 + 1).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), threads * per_thread as usize);

    let snap = registry.snapshot().unwrap();
    let seen: HashSet<u32> = snap.iter().map(|(r, _)| r.id.relnumber).collect();
    assert_eq!(seen.len(), threads * per_thread as usize);
}

#[test]
fn test_concurrent_add_remove_leaves_registry_empty() {
    let registry = Arc::new(SharedRegistry::new(4096));
    let threads = 8;
    let per_thread = 200u32;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let relnumber = (t as u32) * per_thread + i;
                    let handle = registry.add(rel(relnumber), t as u64 + 1).unwrap();
                    registry.remove(handle);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(registry.is_empty());
    assert!(registry.snapshot().is_none());
}

#[test]
fn test_snapshots_race_cleanly_with_mutation() {
    let registry = Arc::new(SharedRegistry::new(4096));
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let registry = registry.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for i in 0..500u32 {
                let handle = registry.add(rel(i), 7).unwrap();
                if i % 2 == 0 {
                    registry.remove(handle);
                }
            }
        })
    };

    let reader = {
        let registry = registry.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..500 {
                // every snapshot must be internally consistent; the count
                // assertion inside snapshot() panics on a torn list
                if let Some(snap) = registry.snapshot() {
                    assert!(snap.iter().all(|(_, xid)| *xid == 7));
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    // odd relnumbers were never removed
    assert_eq!(registry.len(), 250);
}

#[test]
fn test_worker_mirrors_match_registry_contents() {
    let dir = TempDir::new().unwrap();
    let engine = StorageEngine::open(dir.path()).unwrap();

    let mut a = engine.worker().unwrap();
    a.begin_transaction(5);
    let mut b = engine.worker().unwrap();
    b.begin_transaction(6);

    for i in 0..4 {
        a.create_storage(
            RelFileId::new(1663, 16384, 100 + i),
            Persistence::Permanent,
            StorageKind::Standard,
        )
        .unwrap();
    }
    for i in 0..3 {
        b.create_storage(
            RelFileId::new(1663, 16384, 200 + i),
            Persistence::Permanent,
            StorageKind::Standard,
        )
        .unwrap();
    }

    // the registry holds exactly the union of both workers' mirrors
    let snap = engine.registry().snapshot().unwrap();
    let by_a: HashSet<RelFileRef> = snap
        .iter()
        .filter(|(_, xid)| *xid == 5)
        .map(|(r, _)| *r)
        .collect();
    let by_b: HashSet<RelFileRef> = snap
        .iter()
        .filter(|(_, xid)| *xid == 6)
        .map(|(r, _)| *r)
        .collect();

    let a_mirrors: HashSet<RelFileRef> = a.mirrored_rels().into_iter().collect();
    let b_mirrors: HashSet<RelFileRef> = b.mirrored_rels().into_iter().collect();
    assert_eq!(by_a, a_mirrors);
    assert_eq!(by_b, b_mirrors);
    assert_eq!(engine.registry().len(), 7);

    // resolving one worker removes exactly its mirrors
    a.commit().unwrap();
    let snap = engine.registry().snapshot().unwrap();
    assert!(snap.iter().all(|(_, xid)| *xid == 6));
    assert_eq!(engine.registry().len(), 3);

    b.abort().unwrap();
    assert!(engine.registry().is_empty());
}

#[test]
fn test_many_workers_resolve_in_parallel() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(StorageEngine::open(dir.path()).unwrap());
    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut worker = engine.worker().unwrap();
                let mut rng = rand::thread_rng();
                barrier.wait();
                for round in 0..10u32 {
                    let xid = (t as u64) * 100 + round as u64 + 1;
                    worker.begin_transaction(xid);
                    worker
                        .create_storage(
                            RelFileId::new(1663, 16384, (t as u32) * 1000 + round),
                            Persistence::Permanent,
                            StorageKind::Standard,
                        )
                        .unwrap();
                    if rng.gen_bool(0.5) {
                        worker.commit().unwrap();
                    } else {
                        worker.abort().unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // every transaction resolved, so no mirrors remain
    assert!(engine.registry().is_empty());
    assert!(engine.log_pending_delete_snapshot().unwrap().is_none());
}
