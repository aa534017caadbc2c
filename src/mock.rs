//! In-memory connections for unit tests

use crate::connection::{Connection, ConnectionError, Cursor};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct MockState {
    dead: AtomicBool,
    fail_rollback: AtomicBool,
    closed: AtomicBool,
    rollbacks: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

/// Remote control for a [`MockConnection`] that stays with the test
#[derive(Clone)]
pub(crate) struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    pub fn kill(&self) {
        self.state.dead.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self) {
        self.state.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().clone()
    }
}

pub(crate) struct MockConnection {
    pub id: usize,
    state: Arc<MockState>,
}

impl MockConnection {
    pub fn new(id: usize) -> (Self, MockHandle) {
        let state = Arc::new(MockState::default());
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (Self { id, state }, handle)
    }

    fn check(&self) -> Result<(), ConnectionError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if self.state.dead.load(Ordering::SeqCst) {
            return Err(ConnectionError::Lost("server has gone away".into()));
        }
        Ok(())
    }
}

struct MockCursor<'a> {
    conn: &'a MockConnection,
}

impl Cursor for MockCursor<'_> {
    fn execute(&mut self, statement: &str) -> Result<u64, ConnectionError> {
        self.conn.check()?;
        if statement.starts_with("FAIL") {
            return Err(ConnectionError::Query(statement.to_string()));
        }
        self.conn.state.statements.lock().push(statement.to_string());
        Ok(1)
    }
}

impl Connection for MockConnection {
    fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError> {
        self.check()?;
        Ok(Box::new(MockCursor { conn: self }))
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.check()?;
        if self.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(ConnectionError::Lost("rollback failed".into()));
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FactoryState {
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    failing: AtomicBool,
    handles: Mutex<Vec<MockHandle>>,
}

/// Connection factory that counts attempts and can be told to fail
#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    state: Arc<FactoryState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` creation attempts.
    pub fn fail_next(&self, count: usize) {
        self.state.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.state.handles.lock().len()
    }

    pub fn handle(&self, index: usize) -> MockHandle {
        self.state.handles.lock()[index].clone()
    }

    pub fn create(&self) -> Result<MockConnection, ConnectionError> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(ConnectionError::Refused(format!("attempt {attempt}")));
        }
        let remaining = self.state.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectionError::Refused(format!("attempt {attempt}")));
        }
        let mut handles = self.state.handles.lock();
        let (conn, handle) = MockConnection::new(handles.len());
        handles.push(handle);
        Ok(conn)
    }

    pub fn factory(&self) -> impl Fn() -> Result<MockConnection, ConnectionError> + Send + Sync + 'static {
        let this = self.clone();
        move || this.create()
    }
}
