//! Bounded, thread-safe connection pool

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionError};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{ConnectionMetadata, EvictionPolicy};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics, PoolStats};

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

type Factory<C> = dyn Fn() -> Result<C, ConnectionError> + Send + Sync;

struct IdleConnection<C> {
    conn: C,
    id: usize,
    meta: ConnectionMetadata,
}

/// Capacity bookkeeping, only touched under `PoolInner::slots`
struct SlotState {
    /// Live connections plus slots reserved for connections being created
    total: usize,
    waiting: usize,
    closed: bool,
}

enum Checkout<C> {
    Idle(IdleConnection<C>),
    Reserved,
}

struct PoolInner<C> {
    factory: Box<Factory<C>>,
    config: PoolConfig,
    eviction: EvictionPolicy,
    idle: ArrayQueue<IdleConnection<C>>,
    in_use: DashMap<usize, Instant>,
    slots: Mutex<SlotState>,
    slot_freed: Condvar,
    metrics: MetricsTracker,
    next_id: AtomicUsize,
}

/// A connection checked out of the pool.
///
/// Dropping it (including during unwinding) rolls back any open transaction
/// and puts the connection back in the ready-queue. A connection whose
/// rollback fails is closed and its slot freed instead.
pub struct PooledConnection<C: Connection> {
    conn: Option<C>,
    id: usize,
    meta: ConnectionMetadata,
    broken: bool,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connection> PooledConnection<C> {
    /// Pool-local identifier of the underlying connection
    pub fn id(&self) -> usize {
        self.id
    }

    /// Time since the underlying connection was created
    pub fn age(&self) -> Duration {
        self.meta.created_at.elapsed()
    }

    /// Flag the connection so it is closed rather than reused on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Close the connection now and free its slot.
    pub fn discard(mut self) {
        self.broken = true;
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already released")
    }
}

impl<C: Connection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already released")
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.id, self.meta, self.broken);
        }
    }
}

/// Thread-safe pool of up to `max_connections` lazily created connections.
///
/// Cloning is cheap and yields a handle to the same pool.
///
/// # Examples
///
/// ```
/// use resilient_pool::{ConnectionPool, PoolConfig};
/// # use resilient_pool::{Connection, ConnectionError, Cursor};
/// # struct Db;
/// # struct Cur;
/// # impl Cursor for Cur {
/// #     fn execute(&mut self, _: &str) -> Result<u64, ConnectionError> { Ok(1) }
/// # }
/// # impl Connection for Db {
/// #     fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError> { Ok(Box::new(Cur)) }
/// #     fn close(&mut self) -> Result<(), ConnectionError> { Ok(()) }
/// #     fn rollback(&mut self) -> Result<(), ConnectionError> { Ok(()) }
/// # }
///
/// let pool = ConnectionPool::new(|| Ok(Db), PoolConfig::new().with_max_connections(2));
/// {
///     let mut conn = pool.get_connection().unwrap();
///     conn.cursor().unwrap().execute("SELECT * FROM items").unwrap();
///     // Connection returns to the pool when `conn` goes out of scope
/// }
/// assert_eq!(pool.available_count(), 1);
/// ```
pub struct ConnectionPool<C: Connection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> ConnectionPool<C> {
    /// Create an empty pool around a connection factory
    pub fn new<F>(factory: F, mut config: PoolConfig) -> Self
    where
        F: Fn() -> Result<C, ConnectionError> + Send + Sync + 'static,
    {
        config.max_connections = config.max_connections.max(1);
        let eviction = config.eviction_policy();

        Self {
            inner: Arc::new(PoolInner {
                factory: Box::new(factory),
                idle: ArrayQueue::new(config.max_connections),
                config,
                eviction,
                in_use: DashMap::new(),
                slots: Mutex::new(SlotState {
                    total: 0,
                    waiting: 0,
                    closed: false,
                }),
                slot_freed: Condvar::new(),
                metrics: MetricsTracker::new(),
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a live connection.
    ///
    /// Reuses an idle connection when one passes its liveness probe, creates
    /// one while under capacity, and otherwise waits up to the configured
    /// timeout before failing with [`PoolError::Exhausted`].
    pub fn get_connection(&self) -> PoolResult<PooledConnection<C>> {
        let deadline = Instant::now().checked_add(self.inner.config.timeout);

        loop {
            match self.inner.checkout(deadline)? {
                Checkout::Idle(idle) => {
                    if let Some(conn) = self.inner.revive(idle) {
                        return Ok(conn);
                    }
                }
                Checkout::Reserved => return self.inner.create(),
            }
        }
    }

    /// Check out a connection without blocking the async runtime
    pub async fn get_connection_async(&self) -> PoolResult<PooledConnection<C>> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.get_connection())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Run `f` with a checked-out connection, releasing it afterwards
    pub fn with_connection<T, F>(&self, f: F) -> PoolResult<T>
    where
        F: FnOnce(&mut C) -> Result<T, ConnectionError>,
    {
        let mut conn = self.get_connection()?;
        f(&mut *conn).map_err(PoolError::Connection)
    }

    /// Close the pool for good.
    ///
    /// Idle connections are closed immediately, blocked callers fail with
    /// [`PoolError::Closed`], and connections still checked out are closed
    /// when released.
    pub fn close_all(&self) {
        let drained: Vec<IdleConnection<C>> = {
            let mut slots = self.inner.slots.lock();
            if slots.closed {
                return;
            }
            slots.closed = true;

            let drained: Vec<_> = std::iter::from_fn(|| self.inner.idle.pop()).collect();
            slots.total = slots.total.saturating_sub(drained.len());
            self.inner.slot_freed.notify_all();
            drained
        };

        for mut idle in drained {
            let _ = idle.conn.close();
        }

        tracing::info!(
            in_use = self.inner.in_use.len(),
            "Connection pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.lock().closed
    }

    /// Get an occupancy snapshot
    pub fn stats(&self) -> PoolStats {
        let (total, closed) = {
            let slots = self.inner.slots.lock();
            (slots.total, slots.closed)
        };
        PoolStats {
            total_connections: total,
            available_connections: self.inner.idle.len(),
            in_use_connections: self.inner.in_use.len(),
            max_connections: self.inner.config.max_connections,
            is_closed: closed,
        }
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::new(&self.stats())
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (total, waiting) = {
            let slots = self.inner.slots.lock();
            (slots.total, slots.waiting)
        };
        self.inner.metrics.get_metrics(
            total,
            self.inner.idle.len(),
            self.inner.in_use.len(),
            waiting,
            self.inner.config.max_connections,
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    /// Longest time any connection has currently been checked out
    pub fn longest_checkout(&self) -> Option<Duration> {
        self.inner
            .in_use
            .iter()
            .map(|entry| entry.value().elapsed())
            .max()
    }

    pub fn available_count(&self) -> usize {
        self.inner.idle.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.len()
    }

    pub fn max_connections(&self) -> usize {
        self.inner.config.max_connections
    }

    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }
}

impl<C: Connection> PoolInner<C> {
    /// Take an idle connection or reserve a creation slot, waiting for one
    /// of the two until `deadline`. `None` waits without limit.
    fn checkout(&self, deadline: Option<Instant>) -> PoolResult<Checkout<C>> {
        let mut slots = self.slots.lock();
        let mut announced = false;

        loop {
            if slots.closed {
                return Err(PoolError::Closed);
            }

            if let Some(idle) = self.idle.pop() {
                return Ok(Checkout::Idle(idle));
            }

            if slots.total < self.config.max_connections {
                slots.total += 1;
                return Ok(Checkout::Reserved);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.metrics.exhaustion_events.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    max_connections = self.config.max_connections,
                    timeout = ?self.config.timeout,
                    "Connection pool exhausted"
                );
                return Err(PoolError::Exhausted(self.config.timeout));
            }

            if !announced {
                tracing::warn!(
                    max_connections = self.config.max_connections,
                    timeout = ?self.config.timeout,
                    "Connection pool full, waiting for a connection"
                );
                announced = true;
            }

            slots.waiting += 1;
            match deadline {
                Some(deadline) => {
                    let _ = self.slot_freed.wait_until(&mut slots, deadline);
                }
                None => self.slot_freed.wait(&mut slots),
            }
            slots.waiting -= 1;
        }
    }

    /// Hand out an idle connection if it is still fresh and alive
    fn revive(self: &Arc<Self>, idle: IdleConnection<C>) -> Option<PooledConnection<C>> {
        let IdleConnection { mut conn, id, meta } = idle;

        if meta.is_expired(&self.eviction) {
            tracing::debug!(connection_id = id, "Evicting expired connection");
            self.discard(conn);
            return None;
        }

        if let Err(error) = conn.probe() {
            tracing::warn!(connection_id = id, %error, "Dead connection found in pool, replacing it");
            self.discard(conn);
            return None;
        }

        Some(self.lend(conn, id, meta))
    }

    /// Fill a reserved slot with a new connection
    fn create(self: &Arc<Self>) -> PoolResult<PooledConnection<C>> {
        match (self.factory)() {
            Ok(mut conn) => {
                if self.slots.lock().closed {
                    let _ = conn.close();
                    self.free_slot();
                    return Err(PoolError::Closed);
                }

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.metrics.connections_created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    connection_id = id,
                    total = self.slots.lock().total,
                    max_connections = self.config.max_connections,
                    "Created new database connection"
                );
                Ok(self.lend(conn, id, ConnectionMetadata::new()))
            }
            Err(error) => {
                self.metrics.creation_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%error, "Failed to create database connection");
                self.free_slot();
                Err(PoolError::Creation(error))
            }
        }
    }

    fn lend(self: &Arc<Self>, conn: C, id: usize, mut meta: ConnectionMetadata) -> PooledConnection<C> {
        meta.touch();
        self.in_use.insert(id, Instant::now());
        self.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);

        PooledConnection {
            conn: Some(conn),
            id,
            meta,
            broken: false,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut conn: C, id: usize, mut meta: ConnectionMetadata, broken: bool) {
        self.in_use.remove(&id);

        if broken {
            tracing::debug!(connection_id = id, "Discarding connection flagged as broken");
            self.discard(conn);
            return;
        }

        if let Err(error) = conn.rollback() {
            tracing::warn!(connection_id = id, %error, "Failed to return connection to pool");
            self.discard(conn);
            return;
        }
        meta.touch();

        let slots = self.slots.lock();
        if slots.closed {
            drop(slots);
            let _ = conn.close();
            self.free_slot();
            return;
        }

        match self.idle.push(IdleConnection { conn, id, meta }) {
            Ok(()) => {
                self.metrics.total_released.fetch_add(1, Ordering::Relaxed);
                self.slot_freed.notify_one();
            }
            Err(rejected) => {
                drop(slots);
                self.discard(rejected.conn);
            }
        }
    }

    /// Close a connection that will not be reused and give its slot back
    fn discard(&self, mut conn: C) {
        let _ = conn.close();
        self.metrics.connections_discarded.fetch_add(1, Ordering::Relaxed);
        self.free_slot();
    }

    fn free_slot(&self) {
        let mut slots = self.slots.lock();
        slots.total = slots.total.saturating_sub(1);
        self.slot_freed.notify_one();
    }
}
