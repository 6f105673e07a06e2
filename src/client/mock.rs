//! In-memory cluster for tests
//!
//! Answers the three queries the exporter issues (the stats feed, table
//! info and table count) from fixture data, and lets tests inject closed
//! connections, failing tables and slow count queries. A loopback server
//! that completes the real handshake backs the pool tests.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::Sha256;

use super::transport::{Connector, QueryExecutor, Transport, STATS_TABLE, SYSTEM_DB};
use crate::utils::reql::{self, term_type};
use crate::utils::{ConnectionError, ProtocolError, Result, Term};

pub struct MockCluster {
    stats: Mutex<Vec<Value>>,
    /// (db, table) -> document count
    docs: Mutex<BTreeMap<(String, String), u64>>,
    failing_tables: Mutex<HashSet<String>>,
    fail_stats: AtomicBool,
    fail_reconnect: AtomicBool,
    close_next: AtomicUsize,
    count_delay: Mutex<Duration>,
    queries: AtomicUsize,
    reconnects: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCluster {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            stats: Mutex::new(Vec::new()),
            docs: Mutex::new(BTreeMap::new()),
            failing_tables: Mutex::new(HashSet::new()),
            fail_stats: AtomicBool::new(false),
            fail_reconnect: AtomicBool::new(false),
            close_next: AtomicUsize::new(0),
            count_delay: Mutex::new(Duration::ZERO),
            queries: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Two servers, database `test` with tables `test1` (4 documents)
    /// and `test2` (empty), each with one replica per server
    pub fn with_fixture() -> Arc<Self> {
        let cluster = Self::empty();
        cluster.push_row(json!({
            "id": ["cluster"],
            "query_engine": {
                "client_connections": 3,
                "clients_active": 1,
                "queries_per_sec": 12.5,
                "read_docs_per_sec": 40,
                "written_docs_per_sec": 4
            }
        }));
        for server in ["node_a", "node_b"] {
            cluster.add_server(server);
        }
        cluster.add_table("test", "test1", 4, &["node_a", "node_b"]);
        cluster.add_table("test", "test2", 0, &["node_a", "node_b"]);
        cluster
    }

    pub fn push_row(&self, row: Value) {
        self.stats.lock().push(row);
    }

    pub fn add_server(&self, name: &str) {
        self.push_row(json!({
            "id": ["server", format!("uuid-{}", name)],
            "server": name,
            "query_engine": {
                "client_connections": 1,
                "clients_active": 1,
                "queries_per_sec": 6,
                "queries_total": 1200,
                "read_docs_per_sec": 20,
                "read_docs_total": 5000,
                "written_docs_per_sec": 2,
                "written_docs_total": 300
            }
        }));
    }

    /// Add a table row, one replica row per server, and its documents
    pub fn add_table(&self, db: &str, table: &str, docs: u64, replicas: &[&str]) {
        self.push_row(json!({
            "id": ["table", format!("uuid-{}", table)],
            "db": db,
            "table": table,
            "query_engine": {
                "read_docs_per_sec": 10,
                "written_docs_per_sec": 1,
                "written_docs_total": docs
            }
        }));
        for server in replicas {
            self.push_row(json!({
                "id": ["table_server", format!("uuid-{}", table), format!("uuid-{}", server)],
                "db": db,
                "table": table,
                "server": server,
                "query_engine": {
                    "read_docs_per_sec": 5,
                    "read_docs_total": 100,
                    "written_docs_per_sec": 0.5,
                    "written_docs_total": docs
                },
                "storage_engine": {
                    "cache": {"in_use_bytes": 2048},
                    "disk": {
                        "read_bytes_per_sec": 0,
                        "read_bytes_total": 4096,
                        "written_bytes_per_sec": 128,
                        "written_bytes_total": 8192,
                        "space_usage": {
                            "data_bytes": 1024,
                            "garbage_bytes": 0,
                            "metadata_bytes": 512,
                            "preallocated_bytes": 256
                        }
                    }
                }
            }));
        }
        self.docs
            .lock()
            .insert((db.to_string(), table.to_string()), docs);
    }

    /// Remove a table and its replicas from the feed
    pub fn drop_table(&self, table: &str) {
        self.stats
            .lock()
            .retain(|row| row.get("table").and_then(Value::as_str) != Some(table));
        self.docs.lock().retain(|(_, t), _| t != table);
    }

    pub fn fail_table(&self, table: &str) {
        self.failing_tables.lock().insert(table.to_string());
    }

    pub fn fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    /// The next `n` queries fail with a closed connection
    pub fn close_next(&self, n: usize) {
        self.close_next.store(n, Ordering::SeqCst);
    }

    pub fn set_count_delay(&self, delay: Duration) {
        *self.count_delay.lock() = delay;
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Highest number of table queries observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn table_query(&self, term: &Term, db: &str, table: &str) -> Result<Vec<Value>> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.count_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let result = self.answer_table_query(term, db, table);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn answer_table_query(&self, term: &Term, db: &str, table: &str) -> Result<Vec<Value>> {
        if self.failing_tables.lock().contains(table) {
            return Err(ProtocolError::RuntimeError(format!(
                "Table `{}.{}` is not available",
                db, table
            ))
            .into());
        }
        let docs = self
            .docs
            .lock()
            .get(&(db.to_string(), table.to_string()))
            .copied()
            .ok_or_else(|| {
                ProtocolError::RuntimeError(format!("Table `{}.{}` does not exist.", db, table))
            })?;

        match term.term_type() {
            Some(term_type::INFO) => Ok(vec![json!({
                "name": table,
                "db": {"name": db},
                "doc_count_estimates": [docs]
            })]),
            _ => Ok(vec![json!(docs)]),
        }
    }
}

impl QueryExecutor for MockCluster {
    fn run_query(&self, term: &Term) -> Result<Vec<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let closing = self
            .close_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if closing.is_ok() {
            return Err(ConnectionError::Closed.into());
        }

        let (db, table) = term
            .table_ref()
            .ok_or_else(|| ProtocolError::CompileError("unsupported term".to_string()))?;

        match term.term_type() {
            Some(term_type::TABLE) if db == SYSTEM_DB && table == STATS_TABLE => {
                if self.fail_stats.load(Ordering::SeqCst) {
                    return Err(ProtocolError::RuntimeError(
                        "Cannot perform read: primary replica for shard unavailable".to_string(),
                    )
                    .into());
                }
                Ok(self.stats.lock().clone())
            }
            Some(term_type::INFO) | Some(term_type::COUNT) => {
                let (db, table) = (db.to_string(), table.to_string());
                self.table_query(term, &db, &table)
            }
            _ => Err(ProtocolError::CompileError("unsupported term".to_string()).into()),
        }
    }
}

/// Transport handed out by `MockConnector`
pub struct MockHandle {
    cluster: Arc<MockCluster>,
    closed: AtomicBool,
}

impl QueryExecutor for MockHandle {
    fn run_query(&self, term: &Term) -> Result<Vec<Value>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed.into());
        }
        self.cluster.run_query(term)
    }
}

impl Transport for MockHandle {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn reconnect(&self) -> Result<()> {
        self.cluster.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.cluster.fail_reconnect.load(Ordering::SeqCst) {
            return Err(refused().into());
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector over a `MockCluster`; `cluster = None` is an unreachable address
pub struct MockConnector {
    cluster: Option<Arc<MockCluster>>,
    fail_first: usize,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        Self {
            cluster: Some(cluster),
            fail_first: 0,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            cluster: None,
            fail_first: 0,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Refuse the first `n` connection attempts
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn refused() -> ConnectionError {
    ConnectionError::ConnectFailed {
        addr: "mock:28015".to_string(),
        source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
    }
}

impl Connector for MockConnector {
    type Transport = MockHandle;

    fn connect(&self) -> Result<MockHandle> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.cluster {
            Some(cluster) if attempt >= self.fail_first => Ok(MockHandle {
                cluster: Arc::clone(cluster),
                closed: AtomicBool::new(false),
            }),
            _ => Err(refused().into()),
        }
    }
}

/// Start a loopback server that accepts the V1_0 handshake for `admin`
/// with an empty password and answers every query with `[1]`.
/// Returns its address and the number of connections it accepted.
pub fn spawn_handshake_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            thread::spawn(move || serve_connection(stream));
        }
    });
    (addr, accepted)
}

fn serve_connection(mut stream: TcpStream) {
    if accept_handshake(&mut stream).is_err() {
        return;
    }
    loop {
        let mut header = [0u8; 12];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut query = vec![0u8; len];
        if stream.read_exact(&mut query).is_err() {
            return;
        }

        let body = br#"{"t":1,"r":[1]}"#;
        let mut reply = header[..8].to_vec();
        reply.extend_from_slice(&(body.len() as u32).to_le_bytes());
        reply.extend_from_slice(body);
        if stream.write_all(&reply).is_err() {
            return;
        }
    }
}

fn accept_handshake(stream: &mut TcpStream) -> io::Result<()> {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic)?;
    write_message(
        stream,
        &json!({
            "success": true,
            "min_protocol_version": 0,
            "max_protocol_version": 0,
            "server_version": "2.4.4"
        }),
    )?;

    let first: Value = serde_json::from_slice(&reql::read_null_terminated(stream)?)?;
    let client_first = first["authentication"].as_str().unwrap_or_default();
    let client_first_bare = client_first.trim_start_matches("n,,");
    let client_nonce = client_first_bare.split(",r=").nth(1).unwrap_or_default();

    let salt = b"loopback-salt";
    let iterations = 16;
    let server_first = format!(
        "r={}srv,s={},i={}",
        client_nonce,
        STANDARD.encode(salt),
        iterations
    );
    write_message(stream, &json!({"success": true, "authentication": server_first}))?;

    let last: Value = serde_json::from_slice(&reql::read_null_terminated(stream)?)?;
    let client_final = last["authentication"].as_str().unwrap_or_default();
    let without_proof = client_final.split(",p=").next().unwrap_or_default();
    let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);

    let mut salted_password = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(b"", salt, iterations, &mut salted_password);
    let server_key = hmac_sha256(&salted_password, b"Server Key");
    let signature = hmac_sha256(&server_key, auth_message.as_bytes());
    write_message(
        stream,
        &json!({"success": true, "authentication": format!("v={}", STANDARD.encode(signature))}),
    )
}

fn write_message(stream: &mut TcpStream, message: &Value) -> io::Result<()> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(0);
    stream.write_all(&bytes)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
