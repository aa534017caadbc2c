mod common;

use common::FakeServer;
use resilient_pool::{Connection, ConnectionPool, PoolConfig, PoolError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn pool(server: &FakeServer, max: usize, timeout: Duration) -> ConnectionPool<common::FakeConnection> {
    let server = server.clone();
    ConnectionPool::new(
        move || server.connect(),
        PoolConfig::new().with_max_connections(max).with_timeout(timeout),
    )
}

#[test]
fn test_full_pool_times_out_then_unblocks() {
    let server = FakeServer::new();
    let pool = pool(&server, 2, Duration::from_secs(1));

    let a = pool.get_connection().unwrap();
    let _b = pool.get_connection().unwrap();

    let started = Instant::now();
    let result = pool.get_connection();
    let waited = started.elapsed();
    assert!(matches!(result, Err(PoolError::Exhausted(_))));
    assert!(waited >= Duration::from_millis(900));
    assert!(waited < Duration::from_secs(3));

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let started = Instant::now();
            pool.get_connection().map(|_| started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(100));
    drop(a);

    let waited = waiter.join().unwrap().unwrap();
    assert!(waited < Duration::from_millis(900));
    assert_eq!(server.opened(), 2);
}

#[test]
fn test_capacity_holds_under_contention() {
    let server = FakeServer::new();
    let pool = pool(&server, 3, Duration::from_secs(5));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..12)
        .map(|_| {
            let pool = pool.clone();
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..20 {
                    let mut conn = pool.get_connection().unwrap();
                    peak.fetch_max(pool.in_use_count(), Ordering::SeqCst);
                    conn.cursor().unwrap().execute("SELECT 1").unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(server.opened() <= 3);
    assert_eq!(pool.in_use_count(), 0);
}

#[test]
fn test_outage_replaces_dead_connections() {
    let server = FakeServer::new();
    let pool = pool(&server, 2, Duration::from_millis(200));

    drop(pool.get_connection().unwrap());
    assert_eq!(server.opened(), 1);

    server.set_down(true);
    assert!(matches!(pool.get_connection(), Err(PoolError::Creation(_))));
    assert_eq!(pool.stats().total_connections, 0);

    server.set_down(false);
    let rows = pool
        .with_connection(|conn| conn.cursor()?.execute("SELECT 1"))
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(server.opened(), 2);
}

#[test]
fn test_close_all_is_terminal() {
    let server = FakeServer::new();
    let pool = pool(&server, 2, Duration::from_secs(1));

    let held = pool.get_connection().unwrap();
    drop(pool.get_connection().unwrap());

    pool.close_all();
    assert!(pool.is_closed());
    assert_eq!(server.closed(), 1);
    assert!(matches!(pool.get_connection(), Err(PoolError::Closed)));

    drop(held);
    assert_eq!(server.closed(), 2);
}

#[tokio::test]
async fn test_async_checkout_waits_for_release() {
    let server = FakeServer::new();
    let pool = pool(&server, 1, Duration::from_secs(2));
    let held = pool.get_connection().unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_connection_async().await.map(|conn| conn.id()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let id = held.id();
    drop(held);

    assert_eq!(waiter.await.unwrap().unwrap(), id);
}

#[test]
fn test_metrics_track_activity() {
    let server = FakeServer::new();
    let pool = pool(&server, 2, Duration::from_millis(50));

    let _a = pool.get_connection().unwrap();
    let _b = pool.get_connection().unwrap();
    assert!(pool.get_connection().is_err());

    let metrics = pool.get_metrics();
    assert_eq!(metrics.connections_created, 2);
    assert_eq!(metrics.exhaustion_events, 1);
    assert_eq!(metrics.in_use_connections, 2);
    assert!(!pool.get_health_status().is_healthy());

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["max_connections"], 2);
}
