//! ReQL JSON protocol encoder and decoder
//!
//! Queries are framed as an 8-byte little-endian token, a 4-byte
//! little-endian payload length and a JSON array `[type, term, optargs]`.
//! Responses use the same header followed by a JSON object `{"t": .., "r": [..]}`.

use std::io::{self, Read};

use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ProtocolError;

/// Magic number announcing the V1_0 (SCRAM) handshake
pub const HANDSHAKE_V1_0: u32 = 0x34c2_bdc3;

/// Protocol version negotiated during the V1_0 handshake
pub const PROTOCOL_VERSION: i64 = 0;

/// Upper bound for a single response payload
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Upper bound for a single null-terminated handshake message
const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

/// Term type codes used by the exporter
pub mod term_type {
    pub const DB: u32 = 14;
    pub const TABLE: u32 = 15;
    pub const COUNT: u32 = 43;
    pub const INFO: u32 = 79;
}

/// Query type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
}

/// Response type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom,
    SuccessSequence,
    SuccessPartial,
    WaitComplete,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ResponseType::SuccessAtom),
            2 => Some(ResponseType::SuccessSequence),
            3 => Some(ResponseType::SuccessPartial),
            4 => Some(ResponseType::WaitComplete),
            5 => Some(ResponseType::ServerInfo),
            16 => Some(ResponseType::ClientError),
            17 => Some(ResponseType::CompileError),
            18 => Some(ResponseType::RuntimeError),
            _ => None,
        }
    }
}

/// A ReQL term in its JSON wire form
#[derive(Debug, Clone, PartialEq)]
pub struct Term(Value);

impl Term {
    /// `r.db(name)`
    pub fn db(name: &str) -> Self {
        Term(json!([term_type::DB, [name]]))
    }

    /// `<db>.table(name)`
    pub fn table(self, name: &str) -> Self {
        Term(json!([term_type::TABLE, [self.0, name]]))
    }

    /// `<table>.info()`
    pub fn info(self) -> Self {
        Term(json!([term_type::INFO, [self.0]]))
    }

    /// `<table>.count()`
    pub fn count(self) -> Self {
        Term(json!([term_type::COUNT, [self.0]]))
    }

    /// Outermost term type code
    pub fn term_type(&self) -> Option<u32> {
        self.0.get(0).and_then(Value::as_u64).map(|t| t as u32)
    }

    /// Walk down to the innermost `table` term and return `(db, table)`
    pub fn table_ref(&self) -> Option<(&str, &str)> {
        let mut current = &self.0;
        loop {
            let args = current.get(1)?.as_array()?;
            match current.get(0)?.as_u64()? as u32 {
                term_type::TABLE => {
                    let db_term = args.first()?;
                    let db = db_term.get(1)?.get(0)?.as_str()?;
                    let table = args.get(1)?.as_str()?;
                    return Some((db, table));
                }
                _ => current = args.first()?,
            }
        }
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }
}

/// Query encoder with a reusable buffer
pub struct QueryEncoder {
    buf: Vec<u8>,
}

impl QueryEncoder {
    /// Create new encoder with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear buffer for reuse
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode a START query for `term`
    pub fn encode_start(&mut self, token: u64, term: &Term) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(&json!([QueryType::Start as u32, term.0, {}]))?;
        self.write_frame(token, &payload)
    }

    /// Encode a CONTINUE for an open cursor
    pub fn encode_continue(&mut self, token: u64) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(&json!([QueryType::Continue as u32]))?;
        self.write_frame(token, &payload)
    }

    fn write_frame(&mut self, token: u64, payload: &[u8]) -> Result<(), ProtocolError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::InvalidFrame(format!("query too large: {} bytes", payload.len())))?;
        self.buf.extend_from_slice(&token.to_le_bytes());
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(payload);
        Ok(())
    }
}

/// One undecoded response frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub token: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    t: i64,
    #[serde(default)]
    r: Vec<Value>,
}

/// Decoded response
#[derive(Debug, Clone)]
pub struct Response {
    pub token: u64,
    pub kind: ResponseType,
    pub results: Vec<Value>,
}

/// Documents carried by one successful response
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub docs: Vec<Value>,
    /// More documents are available through CONTINUE
    pub more: bool,
}

impl Frame {
    /// Parse the JSON payload
    pub fn into_response(self) -> Result<Response, ProtocolError> {
        let raw: RawResponse = serde_json::from_slice(&self.payload)?;
        let kind = ResponseType::from_code(raw.t).ok_or(ProtocolError::UnexpectedResponse(raw.t))?;
        Ok(Response {
            token: self.token,
            kind,
            results: raw.r,
        })
    }
}

impl Response {
    /// Turn the response into documents, or into the error the server reported
    pub fn into_batch(self) -> Result<Batch, ProtocolError> {
        match self.kind {
            ResponseType::SuccessAtom | ResponseType::SuccessSequence => Ok(Batch {
                docs: self.results,
                more: false,
            }),
            ResponseType::SuccessPartial => Ok(Batch {
                docs: self.results,
                more: true,
            }),
            ResponseType::ClientError => Err(ProtocolError::ClientError(self.error_message())),
            ResponseType::CompileError => Err(ProtocolError::CompileError(self.error_message())),
            ResponseType::RuntimeError => Err(ProtocolError::RuntimeError(self.error_message())),
            ResponseType::WaitComplete => Err(ProtocolError::UnexpectedResponse(4)),
            ResponseType::ServerInfo => Err(ProtocolError::UnexpectedResponse(5)),
        }
    }

    fn error_message(&self) -> String {
        self.results
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", self.results))
    }
}

/// Response decoder for streaming reads
pub struct ResponseDecoder<R> {
    reader: R,
}

impl<R: Read> ResponseDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next frame from the stream
    pub fn read_frame(&mut self) -> io::Result<Frame> {
        let mut header = [0u8; 12];
        self.reader.read_exact(&mut header)?;

        let mut token = [0u8; 8];
        token.copy_from_slice(&header[..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&header[8..]);

        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Response frame too large: {} bytes", len),
            ));
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;

        Ok(Frame {
            token: u64::from_le_bytes(token),
            payload,
        })
    }
}

/// Read one null-terminated handshake message (terminator stripped)
pub fn read_null_terminated<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut message = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            return Ok(message);
        }
        if message.len() >= MAX_HANDSHAKE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Handshake message too large",
            ));
        }
        message.push(byte[0]);
    }
}
