//! Utility modules

pub mod error;
pub mod reql;

pub use error::{ConnectionError, ExporterError, ProtocolError, Result, TlsError};
pub use reql::{Batch, Frame, QueryEncoder, Response, ResponseDecoder, ResponseType, Term};
