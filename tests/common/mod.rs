#![allow(dead_code)]

use resilient_pool::{Connection, ConnectionError, Cursor, DatabaseKind, DatabaseSettings};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Shared switchboard for a fake database server
#[derive(Clone, Default)]
pub struct FakeServer {
    inner: Arc<ServerState>,
}

#[derive(Default)]
struct ServerState {
    down: AtomicBool,
    refuse_next: AtomicUsize,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    queries: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the server down; open connections start failing too
    pub fn set_down(&self, down: bool) {
        self.inner.down.store(down, Ordering::SeqCst);
    }

    pub fn refuse_next(&self, count: usize) {
        self.inner.refuse_next.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    pub fn connect(&self) -> Result<FakeConnection, ConnectionError> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Refused(format!("server down (attempt {attempt})")));
        }
        let refuse = self.inner.refuse_next.load(Ordering::SeqCst);
        if refuse > 0 {
            self.inner.refuse_next.store(refuse - 1, Ordering::SeqCst);
            return Err(ConnectionError::Refused(format!("attempt {attempt} refused")));
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            server: self.clone(),
            closed: false,
        })
    }
}

pub struct FakeConnection {
    server: FakeServer,
    closed: bool,
}

impl FakeConnection {
    fn check(&self) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        if self.server.inner.down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Lost("connection reset by peer".into()));
        }
        Ok(())
    }
}

struct FakeCursor<'a> {
    conn: &'a FakeConnection,
}

impl Cursor for FakeCursor<'_> {
    fn execute(&mut self, _statement: &str) -> Result<u64, ConnectionError> {
        self.conn.check()?;
        self.conn.server.inner.queries.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }
}

impl Connection for FakeConnection {
    fn cursor(&mut self) -> Result<Box<dyn Cursor + '_>, ConnectionError> {
        self.check()?;
        Ok(Box::new(FakeCursor { conn: self }))
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if !self.closed {
            self.closed = true;
            self.server.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.check()
    }
}

pub fn settings() -> DatabaseSettings {
    DatabaseSettings {
        kind: DatabaseKind::MySql,
        host: "content.local".into(),
        port: 3306,
        database: "peq".into(),
        username: "eq".into(),
        password: "secret".into(),
        use_ssl: true,
    }
}
