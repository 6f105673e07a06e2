//! Client connection layer

pub mod pool;
pub mod raw_connection;
pub mod scram;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use pool::ConnectionPool;
pub use raw_connection::{ConnectionFactory, RawConnection};
pub use session::LazySession;
pub use transport::{ClusterQueries, Connector, QueryExecutor, Transport};
