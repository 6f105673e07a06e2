//! Raw TCP connection speaking the ReQL JSON protocol
//!
//! This module provides direct TCP (and TLS) connections, the V1_0
//! handshake, and the START/CONTINUE loop that drains a query's results.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::scram::ScramClient;
use crate::config::{AuthConfig, SecureTransport, ServerAddress};
use crate::utils::reql::{self, HANDSHAKE_V1_0, PROTOCOL_VERSION};
use crate::utils::{
    ConnectionError, ExporterError, ProtocolError, QueryEncoder, ResponseDecoder, Result, Term,
};

/// Raw connection wrapper (TCP or TLS)
///
/// For TCP, we split into separate reader/writer.
/// For TLS, we use a single stream since native-tls doesn't support cloning.
pub enum RawStream {
    Tcp {
        writer: BufWriter<TcpStream>,
        reader: BufReader<TcpStream>,
    },
    #[cfg(feature = "native-tls-backend")]
    NativeTls {
        stream: native_tls::TlsStream<TcpStream>,
    },
}

/// One authenticated connection to a cluster node
pub struct RawConnection {
    stream: RawStream,
    addr: String,
    next_token: u64,
    encoder: QueryEncoder,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct HandshakeReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    authentication: Option<String>,
    #[serde(default)]
    min_protocol_version: Option<i64>,
    #[serde(default)]
    max_protocol_version: Option<i64>,
    #[serde(default)]
    server_version: Option<String>,
}

fn open_tcp(addr: &ServerAddress, connect_timeout: Duration) -> std::result::Result<TcpStream, ConnectionError> {
    let connect_failed = |source: io::Error| ConnectionError::ConnectFailed {
        addr: addr.to_string(),
        source,
    };

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "No addresses found");
    for sock_addr in (addr.host.as_str(), addr.port)
        .to_socket_addrs()
        .map_err(connect_failed)?
    {
        match TcpStream::connect_timeout(&sock_addr, connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(connect_failed(last_err))
}

impl RawStream {
    fn tcp(stream: TcpStream) -> io::Result<Self> {
        let writer = BufWriter::with_capacity(16 * 1024, stream.try_clone()?);
        let reader = BufReader::with_capacity(64 * 1024, stream);
        Ok(RawStream::Tcp { writer, reader })
    }

    fn tcp_stream(&self) -> &TcpStream {
        match self {
            RawStream::Tcp { reader, .. } => reader.get_ref(),
            #[cfg(feature = "native-tls-backend")]
            RawStream::NativeTls { stream } => stream.get_ref(),
        }
    }
}

impl Read for RawStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RawStream::Tcp { reader, .. } => reader.read(buf),
            #[cfg(feature = "native-tls-backend")]
            RawStream::NativeTls { stream } => stream.read(buf),
        }
    }
}

impl Write for RawStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RawStream::Tcp { writer, .. } => writer.write(buf),
            #[cfg(feature = "native-tls-backend")]
            RawStream::NativeTls { stream } => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RawStream::Tcp { writer, .. } => writer.flush(),
            #[cfg(feature = "native-tls-backend")]
            RawStream::NativeTls { stream } => stream.flush(),
        }
    }
}

impl RawConnection {
    /// Wrap an already connected socket; no handshake is performed
    pub fn from_tcp(stream: TcpStream, addr: &str) -> io::Result<Self> {
        Ok(Self {
            stream: RawStream::tcp(stream)?,
            addr: addr.to_string(),
            next_token: 1,
            encoder: QueryEncoder::with_capacity(512),
            timeout_ms: 0,
        })
    }

    /// Create new TCP connection
    pub fn connect_tcp(
        addr: &ServerAddress,
        connect_timeout: Duration,
    ) -> std::result::Result<Self, ConnectionError> {
        let stream = open_tcp(addr, connect_timeout)?;
        Self::from_tcp(stream, &addr.to_string()).map_err(|source| ConnectionError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })
    }

    /// Create new TLS connection
    #[cfg(feature = "native-tls-backend")]
    pub fn connect_tls(
        addr: &ServerAddress,
        connect_timeout: Duration,
        transport: &SecureTransport,
    ) -> std::result::Result<Self, ConnectionError> {
        let tcp_stream = open_tcp(addr, connect_timeout)?;
        let stream = transport
            .connector()
            .connect(&addr.host, tcp_stream)
            .map_err(|e| ConnectionError::TlsFailed(e.to_string()))?;

        Ok(Self {
            stream: RawStream::NativeTls { stream },
            addr: addr.to_string(),
            next_token: 1,
            encoder: QueryEncoder::with_capacity(512),
            timeout_ms: 0,
        })
    }

    /// Address this connection was opened against
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Apply a socket timeout to every subsequent read and write
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let socket = self.stream.tcp_stream();
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        self.timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
        Ok(())
    }

    fn write_handshake_message(&mut self, message: &Value) -> Result<()> {
        let mut bytes = serde_json::to_vec(message).map_err(ProtocolError::from)?;
        bytes.push(0);
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_handshake_reply(&mut self) -> Result<HandshakeReply> {
        let raw = reql::read_null_terminated(&mut self.stream)?;
        let reply: HandshakeReply = serde_json::from_slice(&raw).map_err(|_| {
            ConnectionError::HandshakeFailed(String::from_utf8_lossy(&raw).into_owned())
        })?;

        if !reply.success {
            let message = reply
                .error
                .clone()
                .unwrap_or_else(|| "handshake rejected".to_string());
            return Err(match reply.error_code {
                Some(10..=20) => ConnectionError::AuthFailed(message),
                _ => ConnectionError::HandshakeFailed(message),
            }
            .into());
        }
        Ok(reply)
    }

    /// Perform the V1_0 handshake and SCRAM-SHA-256 authentication
    pub fn handshake(&mut self, auth: &AuthConfig) -> Result<()> {
        self.stream.write_all(&HANDSHAKE_V1_0.to_le_bytes())?;
        self.stream.flush()?;

        let server_info = self.read_handshake_reply()?;
        let min = server_info.min_protocol_version.unwrap_or(PROTOCOL_VERSION);
        let max = server_info.max_protocol_version.unwrap_or(PROTOCOL_VERSION);
        if !(min..=max).contains(&PROTOCOL_VERSION) {
            return Err(ConnectionError::HandshakeFailed(format!(
                "server supports protocol versions {}..={}, need {}",
                min, max, PROTOCOL_VERSION
            ))
            .into());
        }

        let scram = ScramClient::new(&auth.username, &auth.password);
        self.write_handshake_message(&json!({
            "protocol_version": PROTOCOL_VERSION,
            "authentication_method": "SCRAM-SHA-256",
            "authentication": scram.client_first_message(),
        }))?;

        let server_first = self
            .read_handshake_reply()?
            .authentication
            .ok_or_else(|| ConnectionError::AuthFailed("missing server-first message".to_string()))?;
        let client_final = scram.client_final_message(&server_first)?;

        self.write_handshake_message(&json!({ "authentication": client_final.message }))?;

        let server_final = self
            .read_handshake_reply()?
            .authentication
            .ok_or_else(|| ConnectionError::AuthFailed("missing server-final message".to_string()))?;
        client_final.verify(&server_final)?;

        debug!(
            "Connected to {} (server {})",
            self.addr,
            server_info.server_version.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    fn send_encoded(&mut self) -> Result<()> {
        let timeout_ms = self.timeout_ms;
        self.stream
            .write_all(self.encoder.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(|e| ExporterError::from_socket(e, timeout_ms))
    }

    fn read_batch(&mut self, token: u64) -> Result<reql::Batch> {
        let timeout_ms = self.timeout_ms;
        let frame = ResponseDecoder::new(&mut self.stream)
            .read_frame()
            .map_err(|e| ExporterError::from_socket(e, timeout_ms))?;
        if frame.token != token {
            return Err(ProtocolError::TokenMismatch {
                expected: token,
                actual: frame.token,
            }
            .into());
        }
        Ok(frame.into_response()?.into_batch()?)
    }

    /// Run a query and collect every document it returns
    pub fn run(&mut self, term: &Term) -> Result<Vec<Value>> {
        let token = self.next_token;
        self.next_token += 1;

        self.encoder.clear();
        self.encoder.encode_start(token, term)?;
        self.send_encoded()?;

        let mut docs = Vec::new();
        loop {
            let batch = self.read_batch(token)?;
            docs.extend(batch.docs);
            if !batch.more {
                return Ok(docs);
            }
            self.encoder.clear();
            self.encoder.encode_continue(token)?;
            self.send_encoded()?;
        }
    }
}

/// Connection factory for creating connections with common config
#[derive(Clone, Debug)]
pub struct ConnectionFactory {
    pub addresses: Vec<ServerAddress>,
    pub auth: AuthConfig,
    pub tls: Option<SecureTransport>,
    pub connect_timeout: Duration,
    pub query_timeout: Option<Duration>,
    pub max_open: usize,
}

impl ConnectionFactory {
    fn create_at(&self, addr: &ServerAddress) -> Result<RawConnection> {
        let mut conn = match &self.tls {
            #[cfg(feature = "native-tls-backend")]
            Some(tls) => RawConnection::connect_tls(addr, self.connect_timeout, tls)?,
            #[cfg(not(feature = "native-tls-backend"))]
            Some(_) => {
                return Err(ConnectionError::TlsFailed(
                    "TLS support not compiled in".to_string(),
                )
                .into());
            }
            None => RawConnection::connect_tcp(addr, self.connect_timeout)?,
        };

        // The handshake runs under the connect timeout
        conn.set_timeout(Some(self.connect_timeout))?;
        conn.handshake(&self.auth)?;
        conn.set_timeout(self.query_timeout)?;
        Ok(conn)
    }

    /// Connect to the first address that completes the handshake
    pub fn create(&self) -> Result<RawConnection> {
        let mut last_err: ExporterError = ConnectionError::NoAddresses.into();
        for addr in &self.addresses {
            match self.create_at(addr) {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!("Connection to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
