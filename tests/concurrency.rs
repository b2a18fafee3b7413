//! Race tests: the ledger's core promise is that of two conflicting create
//! requests, at most one succeeds — under real parallelism, not just
//! interleaved awaits.

use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use timeshare::config::BookingPolicy;
use timeshare::model::*;
use timeshare::{BookingService, Engine, EngineError};

const H: Ms = 3_600_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("timeshare_test_concurrency");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn seed(engine: &Engine, username: &str, capacity: u32) -> (Ulid, Ulid) {
    let uid = Ulid::new();
    engine
        .register_user(uid, username.into(), format!("{username}@example.com"), "hash".into())
        .await
        .unwrap();
    let rid = Ulid::new();
    engine
        .create_resource(rid, "Room".into(), Some("room".into()), capacity, None)
        .await
        .unwrap();
    (uid, rid)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn identical_interval_storm_one_winner() {
    let engine = Arc::new(Engine::new(test_wal_path("storm_one_winner.wal")).unwrap());
    let (uid, rid) = seed(&engine, "alice", 1).await;

    const N: usize = 64;
    let mut handles = Vec::with_capacity(N);
    for _ in 0..N {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(Ulid::new(), rid, uid, 10 * H, 11 * H, true, None)
                .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error under contention: {e}"),
        }
    }
    assert_eq!(successes, 1, "exactly one of {N} identical requests may win");
    assert_eq!(conflicts, N - 1);

    let confirmed = engine.list_bookings(rid, 0, 24 * H, false).await.unwrap();
    assert_eq!(confirmed.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn capacity_bounds_concurrent_winners() {
    let engine = Arc::new(Engine::new(test_wal_path("storm_capacity.wal")).unwrap());
    let (uid, rid) = seed(&engine, "alice", 3).await;

    const N: usize = 48;
    let mut handles = Vec::with_capacity(N);
    for _ in 0..N {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(Ulid::new(), rid, uid, 10 * H, 11 * H, true, None)
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error under contention: {e}"),
        }
    }
    assert_eq!(successes, 3, "capacity-3 resource admits exactly three");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn disjoint_slots_all_win() {
    let engine = Arc::new(Engine::new(test_wal_path("storm_disjoint.wal")).unwrap());
    let (uid, rid) = seed(&engine, "alice", 1).await;

    const N: usize = 32;
    let mut handles = Vec::with_capacity(N);
    for i in 0..N {
        let engine = engine.clone();
        let start = (i as Ms) * H;
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(Ulid::new(), rid, uid, start, start + H, true, None)
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap(); // back-to-back slots never conflict
    }

    let confirmed = engine.list_bookings(rid, 0, (N as Ms + 1) * H, false).await.unwrap();
    assert_eq!(confirmed.len(), N);
    assert!(confirmed.windows(2).all(|w| w[0].end <= w[1].start));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn random_storm_preserves_non_overlap_invariant() {
    let engine = Arc::new(Engine::new(test_wal_path("storm_random.wal")).unwrap());
    let (uid, rid) = seed(&engine, "alice", 1).await;

    // 96 tasks over 12 partially-overlapping slots, with interleaved cancels
    const N: usize = 96;
    let mut handles = Vec::with_capacity(N);
    for i in 0..N {
        let engine = engine.clone();
        let start = ((i % 12) as Ms) * 30 * 60_000; // 30-minute offsets
        handles.push(tokio::spawn(async move {
            let result = engine
                .create_booking(Ulid::new(), rid, uid, start, start + H, true, None)
                .await;
            if let Ok(record) = &result
                && i % 5 == 0 {
                    engine.cancel_booking(record.id).await.unwrap();
                }
            result
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error under contention: {e}"),
        }
    }

    let confirmed = engine.list_bookings(rid, 0, 24 * H, false).await.unwrap();
    for (i, a) in confirmed.iter().enumerate() {
        for b in confirmed.iter().skip(i + 1) {
            assert!(
                a.end <= b.start || b.end <= a.start,
                "invariant violated: [{}, {}) overlaps [{}, {})",
                a.start,
                a.end,
                b.start,
                b.end
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn readers_see_consistent_snapshots_during_writes() {
    let engine = Arc::new(Engine::new(test_wal_path("storm_readers.wal")).unwrap());
    let (uid, rid) = seed(&engine, "alice", 1).await;

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                let start = (i as Ms) * H;
                let record = engine
                    .create_booking(Ulid::new(), rid, uid, start, start + H, true, None)
                    .await
                    .unwrap();
                if i % 3 == 0 {
                    engine.cancel_booking(record.id).await.unwrap();
                }
            }
        })
    };

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let listed = engine.list_bookings(rid, 0, 300 * H, false).await.unwrap();
                // Ordered, no cancelled rows, no half-written records
                assert!(listed.windows(2).all(|w| w[0].start <= w[1].start));
                for record in &listed {
                    assert!(record.start < record.end);
                    assert_eq!(record.status, BookingStatus::Confirmed);
                }
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn service_storm_through_authorization() {
    let engine = Arc::new(Engine::new(test_wal_path("storm_service.wal")).unwrap());
    let (uid, rid) = seed(&engine, "alice", 1).await;

    // Authorize alice to book rooms via a group grant
    let gid = Ulid::new();
    engine.create_group(gid, "staff".into(), None).await.unwrap();
    engine.add_member(uid, gid).await.unwrap();
    let pid = Ulid::new();
    engine
        .define_permission(pid, Action::Book, Scope::Category("room".into()))
        .await
        .unwrap();
    engine.grant_permission(gid, pid).await.unwrap();

    let service = Arc::new(BookingService::new(engine, BookingPolicy::default()));
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms;

    const N: usize = 32;
    let mut handles = Vec::with_capacity(N);
    for _ in 0..N {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.request_booking(uid, rid, now + H, now + 2 * H).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error under contention: {e}"),
        }
    }
    assert_eq!(successes, 1);
}
