//! TLS configuration and credential loading

use std::path::{Path, PathBuf};

use crate::utils::TlsError;

/// TLS configuration
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub skip_verify: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// Ready-to-use secure transport handed to the connection factory
#[derive(Clone)]
pub struct SecureTransport {
    #[cfg(feature = "native-tls-backend")]
    connector: native_tls::TlsConnector,
}

impl std::fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTransport").finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Reject a certificate without its key or a key without its certificate
    pub fn validate(&self) -> Result<(), TlsError> {
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(TlsError::PartialKeyPair);
        }
        Ok(())
    }

    /// Read the configured files and build the secure transport
    #[cfg(feature = "native-tls-backend")]
    pub fn load(&self) -> Result<SecureTransport, TlsError> {
        use native_tls::{Certificate, Identity, TlsConnector};

        self.validate()?;

        let mut builder = TlsConnector::builder();

        if self.skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(ref ca_path) = self.ca_cert {
            let ca_data = read_file(ca_path)?;
            let cert = Certificate::from_pem(&ca_data)
                .map_err(|e| TlsError::InvalidCa(e.to_string()))?;
            builder.add_root_certificate(cert);
        }

        if let (Some(ref cert_path), Some(ref key_path)) = (&self.client_cert, &self.client_key) {
            let cert_data = read_file(cert_path)?;
            let key_data = read_file(key_path)?;
            let identity = Identity::from_pkcs8(&cert_data, &key_data)
                .map_err(|e| TlsError::InvalidIdentity(e.to_string()))?;
            builder.identity(identity);
        }

        let connector = builder
            .build()
            .map_err(|e| TlsError::InvalidIdentity(e.to_string()))?;

        Ok(SecureTransport { connector })
    }

    #[cfg(not(feature = "native-tls-backend"))]
    pub fn load(&self) -> Result<SecureTransport, TlsError> {
        self.validate()?;
        Err(TlsError::Unsupported)
    }
}

#[cfg(feature = "native-tls-backend")]
impl SecureTransport {
    pub fn connector(&self) -> &native_tls::TlsConnector {
        &self.connector
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
