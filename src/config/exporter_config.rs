//! Exporter configuration derived from CLI arguments

use super::cli::CliArgs;
use super::tls_config::TlsConfig;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Default RethinkDB client driver port
pub const DEFAULT_PORT: u16 = 28015;

/// User the SCRAM handshake authenticates as when none is configured
pub const DEFAULT_USER: &str = "admin";

/// Resolved server address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Parse `host`, `host:port` or `[v6]:port`
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty cluster address".to_string());
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("invalid address '{}'", s))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, s)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("invalid address '{}'", s)),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok(Self {
                host: host.to_string(),
                port: parse_port(port, s)?,
            }),
            Some(_) => Err(format!("IPv6 address '{}' must be bracketed", s)),
            None => Ok(Self {
                host: s.to_string(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16, String> {
    port.parse()
        .map_err(|_| format!("invalid port in address '{}'", addr))
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Authentication configuration
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USER.to_string(),
            password: String::new(),
        }
    }
}

/// How `table_docs_total` is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocCountMode {
    /// Sum of the per-shard estimates reported by `table.info()`
    #[default]
    Estimate,
    /// `table.count()`
    Exact,
}

/// Settings the collector consults on every cycle
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub count_rows: bool,
    pub count_mode: DocCountMode,
    pub table_stats: bool,
    pub count_concurrency: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            count_rows: true,
            count_mode: DocCountMode::Estimate,
            table_stats: true,
            count_concurrency: 8,
        }
    }
}

/// Complete exporter configuration
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    // Connection
    pub addresses: Vec<ServerAddress>,
    pub auth: AuthConfig,
    pub tls: Option<TlsConfig>,
    pub max_open: usize,
    pub connect_timeout: Duration,
    pub query_timeout: Option<Duration>,

    // Collection
    pub collector: CollectorConfig,

    // Exposition
    pub cluster_name: String,
    pub namespace: String,
    pub listen_address: SocketAddr,
    pub metrics_path: String,
}

impl ExporterConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        // Validate first
        args.validate()?;

        let addresses = args
            .addr
            .split(',')
            .filter(|a| !a.trim().is_empty())
            .map(ServerAddress::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if addresses.is_empty() {
            return Err("no cluster address given".to_string());
        }

        // Pre-2.3 auth keys became the admin password
        let password = if args.password.is_empty() {
            args.auth_key.clone()
        } else {
            args.password.clone()
        };
        let username = if args.username.is_empty() {
            DEFAULT_USER.to_string()
        } else {
            args.username.clone()
        };

        let tls = if args.tls {
            Some(TlsConfig {
                skip_verify: args.tls_skip_verify,
                ca_cert: args.tls_ca_cert.clone(),
                client_cert: args.tls_cert.clone(),
                client_key: args.tls_key.clone(),
            })
        } else {
            None
        };

        let query_timeout = if args.query_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(args.query_timeout_ms))
        };

        Ok(Self {
            addresses,
            auth: AuthConfig { username, password },
            tls,
            max_open: args.max_open,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            query_timeout,

            collector: CollectorConfig {
                count_rows: args.count_rows,
                count_mode: if args.count_exact {
                    DocCountMode::Exact
                } else {
                    DocCountMode::Estimate
                },
                table_stats: args.table_stats,
                count_concurrency: args.count_concurrency,
            },

            cluster_name: args.cluster_name.clone(),
            namespace: args.namespace.clone(),
            listen_address: parse_listen_address(&args.listen_address)?,
            metrics_path: args.metrics_path.clone(),
        })
    }
}

/// Accept Go-style `:9123` as "all interfaces"; host names are resolved
fn parse_listen_address(s: &str) -> Result<SocketAddr, String> {
    let full = if s.starts_with(':') {
        format!("0.0.0.0{}", s)
    } else {
        s.to_string()
    };
    full.to_socket_addrs()
        .map_err(|e| format!("invalid listen address '{}': {}", s, e))?
        .next()
        .ok_or_else(|| format!("listen address '{}' resolved to nothing", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            ServerAddress::parse("db1:28016").unwrap(),
            ServerAddress {
                host: "db1".to_string(),
                port: 28016
            }
        );
        assert_eq!(ServerAddress::parse("db1").unwrap().port, DEFAULT_PORT);
        assert_eq!(ServerAddress::parse("[::1]:29015").unwrap().host, "::1");
        assert_eq!(ServerAddress::parse("[::1]").unwrap().port, DEFAULT_PORT);
        assert!(ServerAddress::parse("db1:notaport").is_err());
        assert!(ServerAddress::parse("::1").is_err());
    }

    #[test]
    fn test_address_display() {
        let v6 = ServerAddress::parse("[fe80::1]:28015").unwrap();
        assert_eq!(v6.to_string(), "[fe80::1]:28015");
        assert_eq!(ServerAddress::parse("db").unwrap().to_string(), "db:28015");
    }

    #[test]
    fn test_from_cli_defaults() {
        let args = CliArgs::parse_from(["test"]);
        let config = ExporterConfig::from_cli(&args).unwrap();
        assert_eq!(config.addresses.len(), 1);
        assert_eq!(config.addresses[0].host, "localhost");
        assert_eq!(config.auth.username, "admin");
        assert!(config.auth.password.is_empty());
        assert!(config.tls.is_none());
        assert!(config.query_timeout.is_none());
        assert_eq!(config.listen_address.port(), 9123);
        assert!(config.collector.count_rows);
        assert_eq!(config.collector.count_mode, DocCountMode::Estimate);
    }

    #[test]
    fn test_auth_key_becomes_password() {
        let args = CliArgs::parse_from(["test", "--db.auth", "legacy-key"]);
        let config = ExporterConfig::from_cli(&args).unwrap();
        assert_eq!(config.auth.password, "legacy-key");

        let args = CliArgs::parse_from(["test", "--db.auth", "legacy-key", "--db.pass", "pw"]);
        let config = ExporterConfig::from_cli(&args).unwrap();
        assert_eq!(config.auth.password, "pw");
    }

    #[test]
    fn test_multiple_addresses() {
        let args = CliArgs::parse_from(["test", "--db.addr", "a:1, b:2,"]);
        let config = ExporterConfig::from_cli(&args).unwrap();
        let rendered: Vec<String> = config.addresses.iter().map(|a| a.to_string()).collect();
        assert_eq!(rendered, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_tls_and_timeouts() {
        let args = CliArgs::parse_from([
            "test",
            "--db.tls.enable",
            "--db.tls.ca",
            "ca.pem",
            "--db.query-timeout-ms",
            "1500",
            "--db.count-exact",
            "--web.listen-address",
            "127.0.0.1:9999",
        ]);
        let config = ExporterConfig::from_cli(&args).unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.ca_cert.unwrap().to_str(), Some("ca.pem"));
        assert_eq!(config.query_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.collector.count_mode, DocCountMode::Exact);
        assert_eq!(config.listen_address.to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn test_listen_address_forms() {
        assert_eq!(parse_listen_address(":9123").unwrap().to_string(), "0.0.0.0:9123");
        assert_eq!(
            parse_listen_address("127.0.0.1:9000").unwrap().to_string(),
            "127.0.0.1:9000"
        );

        let resolved = parse_listen_address("localhost:9123").unwrap();
        assert!(resolved.ip().is_loopback());
        assert_eq!(resolved.port(), 9123);

        assert!(parse_listen_address("localhost").is_err());
        assert!(parse_listen_address("127.0.0.1:notaport").is_err());
    }

    #[test]
    fn test_auth_debug_redacts_password() {
        let auth = AuthConfig {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
