//! Configuration module

pub mod cli;
pub mod exporter_config;
pub mod tls_config;

pub use cli::CliArgs;
pub use exporter_config::{
    AuthConfig, CollectorConfig, DocCountMode, ExporterConfig, ServerAddress,
};
pub use tls_config::{SecureTransport, TlsConfig};
