//! Durable self-signed TLS identity for local development
//!
//! Generates a self-signed certificate and RSA private key on first use,
//! persists both into a PKCS#12 key store on disk, and reloads the same
//! identity on every later start. Reusing one identity keeps a browser
//! trust exception valid across server restarts; deleting the store file
//! is the only way to force a fresh identity.
//!
//! **DO NOT use in production** - the store is written with an empty
//! passphrase because it exists for local-trust convenience, not
//! confidentiality.

pub mod self_signed;
pub mod store;

pub use self_signed::{forge_certificate, generate_key_pair, RSA_KEY_BITS};
pub use store::{get_or_create, store_path_under};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;

/// Location of the generated key store, relative to the application root.
pub const KEY_STORE_RELATIVE_PATH: &str = "conf/generated.keystore";

/// Subject and issuer of every generated certificate (self-signed).
///
/// Held constant across regenerations so the identity a developer already
/// trusted keeps the same name after the store file is deleted and rebuilt.
pub const GENERATED_DN: &str =
    "CN=localhost,OU=Unit Testing,O=Mavericks,L=Moon Base 1,ST=Cyberspace,C=CY";

/// Alias of the private-key-and-chain entry in the store.
pub const KEY_ENTRY_ALIAS: &str = "generated";

/// Alias of the bare certificate entry, exposed so the certificate can be
/// imported into a trust store on its own.
pub const TRUSTED_ENTRY_ALIAS: &str = "generated-trusted";

/// Errors raised while establishing the local TLS identity
///
/// All failures surface synchronously through this one taxonomy; nothing is
/// retried. A caller that sees any of these cannot serve HTTPS and decides
/// for itself whether to abort startup or continue without TLS.
#[derive(Debug, Error)]
pub enum KeyStoreInitError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Certificate signing failed: {0}")]
    Signing(String),

    #[error("Key store could not be parsed: {0}")]
    Parse(String),

    #[error("Key store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS provider rejected the key material: {0}")]
    Tls(String),
}

/// Key material loaded from the store, ready to hand to a TLS server
///
/// Rebuilt from the store file on every [`get_or_create`] call; only the
/// file itself is durable.
#[derive(Debug)]
pub struct KeyMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl KeyMaterial {
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Self {
        Self {
            cert_chain,
            private_key,
        }
    }

    /// Build a rustls server configuration around this identity.
    pub fn server_config(&self) -> Result<ServerConfig, KeyStoreInitError> {
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.private_key.clone_key())
            .map_err(|e| KeyStoreInitError::Tls(e.to_string()))
    }
}
