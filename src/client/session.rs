//! Lazily connected session
//!
//! The session starts disconnected and opens its transport on first use.
//! Only a successful connect moves it to connected, so a failed attempt is
//! simply retried by the next caller. There is no backoff: each scrape is
//! the retry interval.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use super::transport::{Connector, QueryExecutor, Transport};
use crate::utils::{Result, Term};

enum SessionState<T> {
    Disconnected,
    Connected(Arc<T>),
}

/// Session manager shared by every scrape
pub struct LazySession<C: Connector> {
    connector: C,
    state: Mutex<SessionState<C::Transport>>,
}

impl<C: Connector> LazySession<C> {
    /// Create a disconnected session; nothing is dialed until first use
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    /// Connect if needed and return the live transport.
    ///
    /// The lock is held across the connect so concurrent callers never
    /// open two transports.
    pub fn ensure_connected(&self) -> Result<Arc<C::Transport>> {
        let mut state = self.state.lock();
        if let SessionState::Connected(transport) = &*state {
            return Ok(Arc::clone(transport));
        }

        let transport = Arc::new(self.connector.connect()?);
        *state = SessionState::Connected(Arc::clone(&transport));
        Ok(transport)
    }

    /// Run a query, reconnecting and retrying once if the connection was
    /// closed under it
    pub fn execute(&self, term: &Term) -> Result<Vec<Value>> {
        let transport = self.ensure_connected()?;
        match transport.run_query(term) {
            Err(e) if e.is_connection_closed() => {
                warn!("Connection closed during query, reconnecting");
                if let Err(reconnect_err) = transport.reconnect() {
                    self.mark_disconnected(&transport);
                    return Err(reconnect_err);
                }
                info!("Session reconnected, retrying query");
                transport.run_query(term)
            }
            result => result,
        }
    }

    pub fn is_connected(&self) -> bool {
        match &*self.state.lock() {
            SessionState::Connected(transport) => transport.is_connected(),
            SessionState::Disconnected => false,
        }
    }

    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Disconnected);
        if let SessionState::Connected(transport) = previous {
            transport.close();
        }
    }

    /// Forget `failed` unless another caller already replaced it
    fn mark_disconnected(&self, failed: &Arc<C::Transport>) {
        let mut state = self.state.lock();
        if let SessionState::Connected(current) = &*state {
            if Arc::ptr_eq(current, failed) {
                failed.close();
                *state = SessionState::Disconnected;
            }
        }
    }
}

impl<C: Connector> QueryExecutor for LazySession<C> {
    fn run_query(&self, term: &Term) -> Result<Vec<Value>> {
        self.execute(term)
    }
}
