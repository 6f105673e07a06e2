//! SCRAM-SHA-256 client side (RFC 5802, RFC 7677)
//!
//! Used by the V1_0 handshake. Only the `n,,` GS2 header (no channel
//! binding) is supported, which is what the server expects.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::utils::ConnectionError;

type HmacSha256 = Hmac<Sha256>;

/// Base64 of the `n,,` GS2 header
const CHANNEL_BINDING: &str = "biws";

/// Client state for one authentication exchange
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
}

/// The client-final message and the server signature it must be answered with
pub struct ClientFinal {
    pub message: String,
    server_signature: Vec<u8>,
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce
    pub fn new(username: &str, password: &str) -> Self {
        let mut raw = [0u8; 18];
        rand::thread_rng().fill(&mut raw[..]);
        Self::with_nonce(username, password, &STANDARD.encode(raw))
    }

    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            nonce: nonce.to_string(),
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.username), self.nonce)
    }

    /// `n,,n=<user>,r=<nonce>`
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    /// Answer the server-first message with the client proof
    pub fn client_final_message(&self, server_first: &str) -> Result<ClientFinal, ConnectionError> {
        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => combined_nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                Some(("e", v)) => return Err(ConnectionError::AuthFailed(v.to_string())),
                _ => {}
            }
        }

        let combined_nonce = combined_nonce
            .ok_or_else(|| malformed("server-first message without nonce"))?;
        if !combined_nonce.starts_with(&self.nonce) {
            return Err(malformed("server nonce does not extend client nonce"));
        }
        let salt = STANDARD
            .decode(salt.ok_or_else(|| malformed("server-first message without salt"))?)
            .map_err(|e| malformed(&format!("invalid salt: {}", e)))?;
        let iterations: u32 = iterations
            .ok_or_else(|| malformed("server-first message without iteration count"))?
            .parse()
            .map_err(|_| malformed("invalid iteration count"))?;
        if iterations == 0 {
            return Err(malformed("invalid iteration count"));
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!("c={},r={}", CHANNEL_BINDING, combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac(&salted_password, b"Server Key")?;
        let server_signature = hmac(&server_key, auth_message.as_bytes())?;

        Ok(ClientFinal {
            message: format!("{},p={}", without_proof, STANDARD.encode(proof)),
            server_signature,
        })
    }
}

impl ClientFinal {
    /// Check the server-final message proves the server knows the password
    pub fn verify(&self, server_final: &str) -> Result<(), ConnectionError> {
        for attr in server_final.split(',') {
            match attr.split_once('=') {
                Some(("v", v)) => {
                    let signature = STANDARD
                        .decode(v)
                        .map_err(|e| malformed(&format!("invalid server signature: {}", e)))?;
                    if signature == self.server_signature {
                        return Ok(());
                    }
                    return Err(ConnectionError::AuthFailed(
                        "server signature mismatch".to_string(),
                    ));
                }
                Some(("e", v)) => return Err(ConnectionError::AuthFailed(v.to_string())),
                _ => {}
            }
        }
        Err(malformed("server-final message without signature"))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ConnectionError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ConnectionError::AuthFailed(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn escape_username(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

fn malformed(msg: &str) -> ConnectionError {
    ConnectionError::AuthFailed(format!("malformed SCRAM exchange: {}", msg))
}
