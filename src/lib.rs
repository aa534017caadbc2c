//! # resilient_pool
//!
//! Thread-safe, bounded database connection pool with a reconnection
//! manager that rebuilds the pool after outages.
//!
//! ## Features
//!
//! - Bounded pool with blocking checkout and a configurable timeout
//! - Automatic return of connections via RAII (Drop trait), with rollback
//! - Liveness probe on checkout; dead connections are replaced transparently
//! - Async checkout for tokio callers
//! - Lifetime and idle eviction
//! - Reconnection manager with exponential backoff between attempts
//! - Layered configuration (TOML file + environment) with consistency checks
//! - Health status, metrics and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use resilient_pool::{Connection, ConnectionError, ConnectionPool, Cursor, PoolConfig};
//!
//! struct Db;
//! struct Cur;
//!
//! impl Cursor for Cur {
//!     fn execute(&mut self, _statement: &str) -> Result<u64, ConnectionError> {
//!         Ok(1)
//!     }
//! }
//!
//! impl Connection for Db {
//!     fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError> {
//!         Ok(Box::new(Cur))
//!     }
//!     fn close(&mut self) -> Result<(), ConnectionError> {
//!         Ok(())
//!     }
//!     fn rollback(&mut self) -> Result<(), ConnectionError> {
//!         Ok(())
//!     }
//! }
//!
//! let pool = ConnectionPool::new(|| Ok(Db), PoolConfig::default());
//! {
//!     let mut conn = pool.get_connection().unwrap();
//!     conn.cursor().unwrap().execute("SELECT 1").unwrap();
//!     // Connection automatically returned when `conn` goes out of scope
//! }
//! assert_eq!(pool.available_count(), 1);
//! ```

mod backoff;
mod config;
mod connection;
mod errors;
mod eviction;
mod health;
mod manager;
mod metrics;
mod pool;
mod settings;
mod validator;

#[cfg(test)]
mod mock;

pub use backoff::ReconnectBackoff;
pub use config::{ManagerConfig, PoolConfig};
pub use connection::{Connection, ConnectionError, Cursor, PROBE_QUERY};
pub use errors::{PoolError, PoolResult};
pub use eviction::EvictionPolicy;
pub use health::HealthStatus;
pub use manager::{ConnectionState, Connector, ManagerStatus, ReconnectionManager};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::{PoolMetrics, PoolStats};
pub use pool::{ConnectionPool, PooledConnection};
pub use settings::{
    ConfigError, DEFAULT_ENV_PREFIX, DatabaseKind, DatabaseSettings, RawDatabaseConfig,
    SettingsLoader, SettingsSource,
};
pub use validator::{FieldComparison, Severity, ValidationIssue, ValidationReport, validate_config};
