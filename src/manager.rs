//! Reconnection manager: a pool that heals itself after outages

use crate::backoff::ReconnectBackoff;
use crate::config::ManagerConfig;
use crate::connection::{Connection, ConnectionError, run_probe_query};
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::metrics::PoolStats;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::settings::{DatabaseKind, DatabaseSettings, SettingsSource};
use crate::validator::ValidationReport;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opens connections for a given set of settings.
///
/// Any `Fn(&DatabaseSettings) -> Result<C, ConnectionError>` closure is a
/// connector.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self, settings: &DatabaseSettings) -> Result<Self::Connection, ConnectionError>;
}

impl<F, C> Connector for F
where
    F: Fn(&DatabaseSettings) -> Result<C, ConnectionError> + Send + Sync + 'static,
    C: Connection,
{
    type Connection = C;

    fn connect(&self, settings: &DatabaseSettings) -> Result<C, ConnectionError> {
        self(settings)
    }
}

/// Connection state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct ManagerState<C: Connection> {
    pool: Option<ConnectionPool<C>>,
    state: ConnectionState,
    backoff: ReconnectBackoff,
    last_attempt_at: Option<SystemTime>,
    settings: Option<DatabaseSettings>,
    validation: Option<ValidationReport>,
    last_error: Option<String>,
    /// Bumped by every `close()`; an attempt that straddles one is dropped
    close_epoch: u64,
}

struct ManagerInner<K: Connector> {
    connector: Arc<K>,
    source: Box<dyn SettingsSource>,
    config: ManagerConfig,
    state: Mutex<ManagerState<K::Connection>>,
}

/// Read-only view of the manager for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub pool_active: bool,
    /// Current reconnect gate
    pub retry_delay: Duration,
    /// Time left before another reconnect attempt is allowed
    pub retry_remaining: Duration,
    pub consecutive_failures: u32,
    pub last_attempt: Option<SystemTime>,
    pub database_type: Option<DatabaseKind>,
    pub config_loaded: bool,
    pub last_error: Option<String>,
    pub validation: Option<ValidationReport>,
    pub pool: Option<PoolStats>,
    pub health: Option<HealthStatus>,
}

impl ManagerStatus {
    /// Flatten into string pairs for key/value dashboards
    pub fn export(&self) -> HashMap<String, String> {
        let mut status = HashMap::new();
        let state = match self.state {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        status.insert("state".to_string(), state.to_string());
        status.insert("connected".to_string(), self.connected.to_string());
        status.insert("pool_active".to_string(), self.pool_active.to_string());
        status.insert("retry_delay".to_string(), format!("{:.3}", self.retry_delay.as_secs_f64()));
        status.insert("retry_remaining".to_string(), format!("{:.3}", self.retry_remaining.as_secs_f64()));
        status.insert("consecutive_failures".to_string(), self.consecutive_failures.to_string());
        status.insert("config_loaded".to_string(), self.config_loaded.to_string());

        if let Some(at) = self.last_attempt {
            let secs = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
            status.insert("last_attempt".to_string(), format!("{secs:.3}"));
        }
        if let Some(kind) = self.database_type {
            status.insert("database_type".to_string(), kind.to_string());
        }
        if let Some(error) = &self.last_error {
            status.insert("last_error".to_string(), error.clone());
        }
        if let Some(pool) = &self.pool {
            status.insert("pool_total_connections".to_string(), pool.total_connections.to_string());
            status.insert("pool_available_connections".to_string(), pool.available_connections.to_string());
            status.insert("pool_in_use_connections".to_string(), pool.in_use_connections.to_string());
            status.insert("pool_max_connections".to_string(), pool.max_connections.to_string());
            status.insert("pool_is_closed".to_string(), pool.is_closed.to_string());
        }
        status
    }
}

/// Resets a `Connecting` state that was never committed, e.g. when a
/// connector panics mid-attempt.
struct AttemptGuard<'a, C: Connection> {
    state: &'a Mutex<ManagerState<C>>,
    armed: bool,
}

impl<C: Connection> Drop for AttemptGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            if state.state == ConnectionState::Connecting {
                state.state = ConnectionState::Disconnected;
            }
        }
    }
}

/// Owns the active [`ConnectionPool`] and rebuilds it after failures.
///
/// Reconnection attempts are gated by an exponential backoff so an outage
/// does not turn into a reconnect storm. Cloning yields a handle to the same
/// manager; construct one at startup and pass it to whatever needs a
/// connection.
///
/// # Examples
///
/// ```
/// use resilient_pool::{DatabaseKind, DatabaseSettings, ManagerConfig, ReconnectionManager};
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
/// let settings = DatabaseSettings {
///     kind: DatabaseKind::MySql,
///     host: "localhost".into(),
///     port: 3306,
///     database: "peq".into(),
///     username: "eq".into(),
///     password: "secret".into(),
///     use_ssl: false,
/// };
///
/// let manager = ReconnectionManager::new(
///     |_: &DatabaseSettings| Ok::<_, ConnectionError>(Db),
///     settings,
///     ManagerConfig::default(),
/// );
///
/// let rows = manager
///     .with_connection(|conn| conn.cursor()?.execute("SELECT id FROM spells"))
///     .unwrap();
/// assert_eq!(rows, 1);
/// assert!(manager.get_status().connected);
/// ```
pub struct ReconnectionManager<K: Connector> {
    inner: Arc<ManagerInner<K>>,
}

impl<K: Connector> Clone for ReconnectionManager<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> ReconnectionManager<K> {
    /// Create a manager. No connection is attempted until first use.
    pub fn new<S: SettingsSource>(connector: K, source: S, config: ManagerConfig) -> Self {
        let backoff = ReconnectBackoff::new(config.base_retry_delay, config.max_retry_delay);
        Self {
            inner: Arc::new(ManagerInner {
                connector: Arc::new(connector),
                source: Box::new(source),
                config,
                state: Mutex::new(ManagerState {
                    pool: None,
                    state: ConnectionState::Disconnected,
                    backoff,
                    last_attempt_at: None,
                    settings: None,
                    validation: None,
                    last_error: None,
                    close_epoch: 0,
                }),
            }),
        }
    }

    /// Make sure a healthy pool exists, connecting if the backoff gate allows.
    ///
    /// Returns immediately, without I/O, when already connected, when the
    /// gate is still closed, or while another caller is connecting.
    pub fn ensure_connection(&self) -> bool {
        self.connect().is_ok()
    }

    /// Run `f` with a pooled connection, retrying on connectivity and
    /// use-time failures.
    ///
    /// Each failed attempt marks the manager unhealthy so the next one
    /// re-validates the pool. Pool exhaustion and a closed pool are returned
    /// straight away.
    pub fn with_connection<T, F>(&self, mut f: F) -> PoolResult<T>
    where
        F: FnMut(&mut K::Connection) -> Result<T, ConnectionError>,
    {
        self.retry(|pool| pool.with_connection(&mut f))
    }

    /// Check out a connection from the active pool, reconnecting if needed.
    ///
    /// Failures while using the returned connection are the caller's to
    /// report through [`ReconnectionManager::mark_unhealthy`].
    pub fn get_connection(&self) -> PoolResult<PooledConnection<K::Connection>> {
        self.retry(|pool| pool.get_connection())
    }

    /// Async variant of [`ReconnectionManager::get_connection`]
    pub async fn get_connection_async(&self) -> PoolResult<PooledConnection<K::Connection>> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.get_connection())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Try to connect up to `max_attempts` times, waiting out the backoff
    /// gate in between. Meant for application startup.
    pub fn initialize(&self, max_attempts: u32) -> bool {
        tracing::info!("Initializing content database connection");

        for attempt in 1..=max_attempts {
            if self.ensure_connection() {
                tracing::info!(attempt, "Content database initialized");
                return true;
            }

            if attempt < max_attempts {
                let wait = {
                    let state = self.inner.state.lock();
                    state
                        .backoff
                        .remaining()
                        .unwrap_or(state.backoff.base_delay())
                };
                tracing::info!(attempt, max_attempts, retry_in = ?wait, "Retrying database connection");
                thread::sleep(wait);
            }
        }

        tracing::warn!("Content database unavailable - will connect on first request");
        false
    }

    /// Record that the active pool can no longer be trusted
    pub fn mark_unhealthy(&self) {
        let mut state = self.inner.state.lock();
        if state.state == ConnectionState::Connected {
            state.state = ConnectionState::Disconnected;
            tracing::warn!("Database connection marked unhealthy");
        }
    }

    /// Snapshot of the manager's state. Never waits on database I/O.
    pub fn get_status(&self) -> ManagerStatus {
        let (mut status, pool) = {
            let state = self.inner.state.lock();
            let status = ManagerStatus {
                state: state.state,
                connected: state.state == ConnectionState::Connected,
                pool_active: state.pool.is_some(),
                retry_delay: state.backoff.current_delay(),
                retry_remaining: state.backoff.remaining().unwrap_or_default(),
                consecutive_failures: state.backoff.consecutive_failures(),
                last_attempt: state.last_attempt_at,
                database_type: state.settings.as_ref().map(|s| s.kind),
                config_loaded: state.settings.is_some(),
                last_error: state.last_error.clone(),
                validation: state.validation.clone(),
                pool: None,
                health: None,
            };
            (status, state.pool.clone())
        };

        if let Some(pool) = pool {
            let stats = pool.stats();
            status.health = Some(HealthStatus::new(&stats));
            status.pool = Some(stats);
        }
        status
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    pub fn retry_delay(&self) -> Duration {
        self.inner.state.lock().backoff.current_delay()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Close the active pool. A later call may connect again.
    pub fn close(&self) {
        let pool = {
            let mut state = self.inner.state.lock();
            state.state = ConnectionState::Disconnected;
            state.close_epoch += 1;
            state.pool.take()
        };

        if let Some(pool) = pool {
            pool.close_all();
            tracing::info!("Content database connection pool closed");
        }
    }

    /// Return the active pool, attempting a reconnect if the gate allows
    fn connect(&self) -> PoolResult<ConnectionPool<K::Connection>> {
        let epoch = {
            let mut state = self.inner.state.lock();
            match (state.state, &state.pool) {
                (ConnectionState::Connected, Some(pool)) => return Ok(pool.clone()),
                (ConnectionState::Connecting, _) => {
                    return Err(PoolError::Unavailable {
                        retry_in: state.backoff.remaining().unwrap_or_default(),
                    });
                }
                _ => {}
            }

            if let Some(retry_in) = state.backoff.remaining() {
                return Err(PoolError::Unavailable { retry_in });
            }

            state.backoff.begin_attempt();
            state.last_attempt_at = Some(SystemTime::now());
            state.state = ConnectionState::Connecting;
            state.close_epoch
        };

        let mut guard = AttemptGuard {
            state: &self.inner.state,
            armed: true,
        };

        tracing::info!("Attempting to establish database connection");
        let validation = self.inner.source.validate();
        let outcome = self.build_pool();

        let mut state = self.inner.state.lock();
        guard.armed = false;
        if validation.is_some() {
            state.validation = validation;
        }

        match outcome {
            Ok((pool, _)) if state.close_epoch != epoch => {
                drop(state);
                pool.close_all();
                tracing::info!("Manager closed during connection attempt, discarding new pool");
                Err(PoolError::Closed)
            }
            Ok((pool, settings)) => {
                state.state = ConnectionState::Connected;
                state.backoff.record_success();
                state.settings = Some(settings);
                state.last_error = None;
                let previous = state.pool.replace(pool.clone());
                drop(state);

                if let Some(previous) = previous {
                    previous.close_all();
                }
                tracing::info!("Database connection pool created successfully");
                Ok(pool)
            }
            Err(error) => {
                state.state = ConnectionState::Disconnected;
                let retry_delay = state.backoff.record_failure();
                state.last_error = Some(error.to_string());
                tracing::error!(
                    %error,
                    retry_delay_ms = retry_delay.as_millis() as u64,
                    "Failed to create connection pool"
                );
                Err(error)
            }
        }
    }

    /// Load settings, build a pool over them and prove it with a real query
    fn build_pool(&self) -> PoolResult<(ConnectionPool<K::Connection>, DatabaseSettings)> {
        let settings = self.inner.source.load()?;
        tracing::info!(
            kind = %settings.kind,
            url = %settings.redacted_url(),
            "Creating connection pool"
        );

        let connector = Arc::clone(&self.inner.connector);
        let pool_settings = settings.clone();
        let pool = ConnectionPool::new(
            move || connector.connect(&pool_settings),
            self.inner.config.pool.clone(),
        );

        let probe = pool
            .get_connection()
            .and_then(|mut conn| run_probe_query(&mut *conn).map_err(PoolError::Connection));

        match probe {
            Ok(()) => Ok((pool, settings)),
            Err(error) => {
                pool.close_all();
                Err(error)
            }
        }
    }

    fn retry<T>(
        &self,
        mut op: impl FnMut(&ConnectionPool<K::Connection>) -> PoolResult<T>,
    ) -> PoolResult<T> {
        let max_retries = self.inner.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.connect().and_then(|pool| op(&pool)) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            tracing::error!(attempt, max_retries, %error, "Connection error");
            self.mark_unhealthy();

            if attempt >= max_retries {
                return Err(error);
            }
            thread::sleep(self.inner.config.retry_interval.saturating_mul(attempt));
        }
    }
}
