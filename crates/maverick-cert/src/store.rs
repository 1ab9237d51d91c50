//! Durable key store cache
//!
//! Get-or-create of the on-disk PKCS#12 store backing the local TLS
//! identity. The file is the only durable state; every call re-derives the
//! key material handle from it.

use std::path::{Path, PathBuf};

use der::Encode;
use p12_keystore::{Certificate as StoreCertificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rsa::pkcs8::EncodePrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::self_signed::{forge_certificate, generate_key_pair};
use crate::{
    KeyMaterial, KeyStoreInitError, KEY_ENTRY_ALIAS, KEY_STORE_RELATIVE_PATH, TRUSTED_ENTRY_ALIAS,
};

/// The store exists for local-trust convenience, not confidentiality.
const STORE_PASSPHRASE: &str = "";

/// Location of the generated store under `app_root`.
pub fn store_path_under(app_root: &Path) -> PathBuf {
    app_root.join(KEY_STORE_RELATIVE_PATH)
}

/// Load the persisted TLS identity, generating and persisting a fresh one
/// first if `store_path` does not exist yet.
///
/// Synchronous and blocking for its whole duration; key generation
/// dominates the cost on a miss. Callers racing each other on the same
/// fresh path can clobber the file mid-write, so invoke this once per
/// process, at startup.
pub fn get_or_create(store_path: &Path) -> Result<KeyMaterial, KeyStoreInitError> {
    if !store_path.exists() {
        info!(
            "Generating new TLS key store at {} (key generation can take a moment)",
            store_path.display()
        );
        create_store(store_path)?;
    } else {
        debug!("Loading existing TLS key store from {}", store_path.display());
    }

    let store = load_store(store_path)?;
    key_material(&store)
}

/// Generate a fresh identity and write it as a new store file.
fn create_store(store_path: &Path) -> Result<(), KeyStoreInitError> {
    let key = generate_key_pair()?;
    let certificate = forge_certificate(&key)?;

    let cert_der = certificate
        .to_der()
        .map_err(|e| KeyStoreInitError::Signing(e.to_string()))?;
    let key_der = key
        .to_pkcs8_der()
        .map_err(|e| KeyStoreInitError::KeyGeneration(e.to_string()))?;

    let stored_cert = StoreCertificate::from_der(&cert_der)
        .map_err(|e| KeyStoreInitError::Parse(e.to_string()))?;
    let local_key_id = Sha1::digest(&cert_der);
    let key_chain = PrivateKeyChain::new(
        key_der.as_bytes(),
        local_key_id.to_vec(),
        vec![stored_cert.clone()],
    );

    let mut store = KeyStore::new();
    store.add_entry(KEY_ENTRY_ALIAS, KeyStoreEntry::PrivateKeyChain(key_chain));
    store.add_entry(TRUSTED_ENTRY_ALIAS, KeyStoreEntry::Certificate(stored_cert));

    let mut writer = store.writer(STORE_PASSPHRASE);
    let bytes = writer
        .write()
        .map_err(|e| KeyStoreInitError::Parse(e.to_string()))?;

    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(store_path, bytes)?;
    debug!("Key store written to {}", store_path.display());

    Ok(())
}

fn load_store(store_path: &Path) -> Result<KeyStore, KeyStoreInitError> {
    let bytes = std::fs::read(store_path)?;
    KeyStore::from_pkcs12(&bytes, STORE_PASSPHRASE)
        .map_err(|e| KeyStoreInitError::Parse(e.to_string()))
}

/// Derive the rustls-facing handle from the loaded store.
fn key_material(store: &KeyStore) -> Result<KeyMaterial, KeyStoreInitError> {
    let entry = store.entry(KEY_ENTRY_ALIAS).ok_or_else(|| {
        KeyStoreInitError::Parse(format!("store has no \"{KEY_ENTRY_ALIAS}\" entry"))
    })?;
    let key_chain = match entry {
        KeyStoreEntry::PrivateKeyChain(key_chain) => key_chain,
        _ => {
            return Err(KeyStoreInitError::Parse(format!(
                "\"{KEY_ENTRY_ALIAS}\" entry holds no private key"
            )))
        }
    };

    let cert_chain = key_chain
        .chain()
        .iter()
        .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
        .collect();
    let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_chain.key().to_vec()));

    Ok(KeyMaterial::new(cert_chain, private_key))
}
