//! In-process stress driver: sequential create latency, conflict storms on a
//! contended resource, and listing throughput. Run with `cargo bench`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use timeshare::Engine;
use timeshare::model::Ms;

const HOUR: Ms = 3_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("timeshare_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    path
}

async fn setup(name: &str, capacity: u32) -> (Arc<Engine>, Ulid, Ulid) {
    let engine = Arc::new(Engine::new(bench_wal_path(name)).unwrap());
    let uid = Ulid::new();
    engine
        .register_user(uid, "bench".into(), "bench@example.com".into(), "hash".into())
        .await
        .unwrap();
    let rid = Ulid::new();
    engine
        .create_resource(rid, "Bench".into(), None, capacity, None)
        .await
        .unwrap();
    (engine, uid, rid)
}

async fn phase1_sequential_creates() {
    let (engine, uid, rid) = setup("sequential", 1).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = (i as Ms) * HOUR;
        let t = Instant::now();
        engine
            .create_booking(Ulid::new(), rid, uid, s, s + HOUR, true, None)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "phase 1: {n} sequential creates in {:.2}s ({:.0} ops/s)",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("create", &mut latencies);
}

async fn phase2_conflict_storm() {
    let (engine, uid, rid) = setup("storm", 1).await;

    // 512 tasks racing over 64 slots: 64 winners, 448 conflicts
    let tasks = 512;
    let slots: Ms = 64;
    let start = Instant::now();
    let mut handles = Vec::with_capacity(tasks);
    for i in 0..tasks {
        let engine = engine.clone();
        let s = ((i as Ms) % slots) * HOUR;
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine
                .create_booking(Ulid::new(), rid, uid, s, s + HOUR, true, None)
                .await;
            (t.elapsed(), result.is_ok())
        }));
    }

    let mut latencies = Vec::with_capacity(tasks);
    let mut winners = 0;
    for handle in handles {
        let (latency, won) = handle.await.unwrap();
        latencies.push(latency);
        if won {
            winners += 1;
        }
    }

    let elapsed = start.elapsed();
    println!(
        "phase 2: {tasks} racing creates over {slots} slots in {:.2}s — {winners} winners, {} conflicts",
        elapsed.as_secs_f64(),
        tasks - winners
    );
    assert_eq!(winners as i64, slots);
    print_latency("contended create", &mut latencies);
}

async fn phase3_listing() {
    let (engine, uid, rid) = setup("listing", 1).await;

    for i in 0..1000 {
        let s = (i as Ms) * HOUR;
        engine
            .create_booking(Ulid::new(), rid, uid, s, s + HOUR, true, None)
            .await
            .unwrap();
    }

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let from = ((i % 500) as Ms) * HOUR;
        let t = Instant::now();
        let listed = engine
            .list_bookings(rid, from, from + 100 * HOUR, false)
            .await
            .unwrap();
        latencies.push(t.elapsed());
        assert!(!listed.is_empty());
    }

    println!("phase 3: {n} range listings over 1000 bookings");
    print_latency("list_bookings", &mut latencies);
}

fn main() {
    tracing_subscriber::fmt::init();
    timeshare::observability::init(None);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        phase1_sequential_creates().await;
        phase2_conflict_storm().await;
        phase3_listing().await;
    });
}
