//! Bounded connection pool
//!
//! Holds at most `max_open` authenticated sockets. Callers past the bound
//! block until a connection is checked back in. A connection that fails at
//! the socket or framing level is dropped instead of being returned.

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::{debug, info};

use super::raw_connection::{ConnectionFactory, RawConnection};
use super::transport::{Connector, QueryExecutor, Transport};
use crate::utils::{ConnectionError, Result, Term};

struct PoolState {
    idle: Vec<RawConnection>,
    /// Connections checked out or idle
    open: usize,
    closed: bool,
}

/// Production `Transport`
pub struct ConnectionPool {
    factory: ConnectionFactory,
    max_open: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Open the pool with one eagerly established connection
    pub fn open(factory: ConnectionFactory) -> Result<Self> {
        let conn = factory.create()?;
        info!("Connected to RethinkDB cluster at {}", conn.addr());

        let max_open = factory.max_open.max(1);
        Ok(Self {
            factory,
            max_open,
            state: Mutex::new(PoolState {
                idle: vec![conn],
                open: 1,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    /// Number of sockets currently held by the pool or its callers
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    fn checkout(&self) -> Result<RawConnection> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(ConnectionError::Closed.into());
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.open < self.max_open {
                state.open += 1;
                drop(state);
                return self.factory.create().map_err(|e| {
                    self.discard();
                    e
                });
            }
            self.available.wait(&mut state);
        }
    }

    fn checkin(&self, conn: RawConnection) {
        let mut state = self.state.lock();
        if state.closed {
            state.open -= 1;
        } else {
            state.idle.push(conn);
        }
        self.available.notify_one();
    }

    fn discard(&self) {
        let mut state = self.state.lock();
        state.open -= 1;
        self.available.notify_one();
    }
}

impl QueryExecutor for ConnectionPool {
    fn run_query(&self, term: &Term) -> Result<Vec<Value>> {
        let mut conn = self.checkout()?;
        match conn.run(term) {
            Ok(docs) => {
                self.checkin(conn);
                Ok(docs)
            }
            Err(e) if e.is_query_error() => {
                self.checkin(conn);
                Err(e)
            }
            Err(e) => {
                debug!("Dropping connection to {}: {}", conn.addr(), e);
                drop(conn);
                self.discard();
                Err(e)
            }
        }
    }
}

impl Transport for ConnectionPool {
    fn is_connected(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.open > 0
    }

    fn reconnect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            let stale = state.idle.len();
            state.idle.clear();
            state.open -= stale;
            state.closed = false;
            if state.open >= self.max_open {
                // Every slot is checked out; callers wait for a checkin
                debug!("Pool full during reconnect, reusing checked-out connections");
                return Ok(());
            }
            state.open += 1;
        }

        let conn = self.factory.create().map_err(|e| {
            self.discard();
            e
        })?;
        info!("Reconnected to RethinkDB cluster at {}", conn.addr());
        self.checkin(conn);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        let idle = state.idle.len();
        state.idle.clear();
        state.open -= idle;
        state.closed = true;
        self.available.notify_all();
    }
}

impl Connector for ConnectionFactory {
    type Transport = ConnectionPool;

    fn connect(&self) -> Result<ConnectionPool> {
        ConnectionPool::open(self.clone())
    }
}
