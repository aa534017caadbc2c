//! Capability interface every pooled connection implements

use thiserror::Error;

/// Statement used by the default liveness probe and the manager's
/// connectivity check.
pub const PROBE_QUERY: &str = "SELECT 1";

/// Errors raised by a driver adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("connection is closed")]
    Closed,
}

/// A statement cursor borrowed from a connection
pub trait Cursor {
    /// Execute a statement, returning the number of rows it produced or touched.
    fn execute(&mut self, statement: &str) -> Result<u64, ConnectionError>;

    fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// An opaque database connection.
///
/// The pool never inspects a connection beyond this trait: it only cares
/// whether it is alive, how to undo pending work, and how to close it. Driver
/// adapters with a native ping should override [`Connection::probe`]; the
/// default runs [`PROBE_QUERY`] through a cursor.
///
/// # Examples
///
/// ```
/// use resilient_pool::{Connection, ConnectionError, Cursor};
///
/// struct Noop;
///
/// impl Cursor for Noop {
///     fn execute(&mut self, _statement: &str) -> Result<u64, ConnectionError> {
///         Ok(1)
///     }
/// }
///
/// struct NoopConnection;
///
/// impl Connection for NoopConnection {
///     fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError> {
///         Ok(Box::new(Noop))
///     }
///     fn close(&mut self) -> Result<(), ConnectionError> {
///         Ok(())
///     }
///     fn rollback(&mut self) -> Result<(), ConnectionError> {
///         Ok(())
///     }
/// }
///
/// let mut conn = NoopConnection;
/// assert!(conn.probe().is_ok());
/// ```
pub trait Connection: Send + 'static {
    fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError>;

    fn close(&mut self) -> Result<(), ConnectionError>;

    /// Discard any open transaction.
    fn rollback(&mut self) -> Result<(), ConnectionError>;

    /// Cheap check that the connection is still usable.
    fn probe(&mut self) -> Result<(), ConnectionError> {
        let mut cursor = self.cursor()?;
        cursor.execute(PROBE_QUERY)?;
        cursor.close()
    }
}

/// Run [`PROBE_QUERY`] through a fresh cursor, regardless of any native ping.
pub(crate) fn run_probe_query<C: Connection + ?Sized>(conn: &mut C) -> Result<(), ConnectionError> {
    let mut cursor = conn.cursor()?;
    cursor.execute(PROBE_QUERY)?;
    cursor.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnection;

    #[test]
    fn test_default_probe_runs_trivial_query() {
        let (mut conn, handle) = MockConnection::new(1);
        conn.probe().unwrap();
        assert_eq!(handle.statements(), vec![PROBE_QUERY.to_string()]);
    }

    #[test]
    fn test_probe_fails_on_dead_connection() {
        let (mut conn, handle) = MockConnection::new(1);
        handle.kill();
        assert!(matches!(conn.probe(), Err(ConnectionError::Lost(_))));
    }
}
