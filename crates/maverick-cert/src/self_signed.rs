//! Self-signed certificate generation
//!
//! Forges the X.509 identity that ends up in the generated key store. The
//! subject never changes between generations; only the key material and the
//! serial number do.

use std::str::FromStr;
use std::time::Duration;

use rsa::pkcs1v15::SigningKey;
use rsa::RsaPrivateKey;
use sha1::Sha1;
use tracing::debug;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{EncodePublicKey, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::{KeyStoreInitError, GENERATED_DN};

/// RSA modulus size for generated identities. The ring-based TLS provider
/// rejects moduli under 2048 bits.
pub const RSA_KEY_BITS: usize = 2048;

/// Fixed certificate lifetime: 50 years in whole seconds, no leap-year
/// adjustment.
pub(crate) const VALIDITY_SECS: u64 = 50 * 365 * 24 * 60 * 60;

/// Generate the RSA key pair backing a fresh identity.
///
/// Blocks the calling thread; key generation is CPU-bound and draws on
/// system entropy.
pub fn generate_key_pair() -> Result<RsaPrivateKey, KeyStoreInitError> {
    let mut rng = rand::rngs::OsRng;
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| KeyStoreInitError::KeyGeneration(e.to_string()))
}

/// Forge a self-signed certificate for `key`.
///
/// The certificate is X.509 v3, valid from now for fifty years, carries a
/// random 64-bit serial number, and is signed sha1WithRSAEncryption. The
/// signer stamps its own algorithm identifier into both the to-be-signed
/// structure and the outer signature field, so the declared and actual
/// algorithm agree byte for byte.
pub fn forge_certificate(key: &RsaPrivateKey) -> Result<Certificate, KeyStoreInitError> {
    let subject = generated_dn()?;
    let serial_number = SerialNumber::from(rand::random::<u64>());
    let validity = Validity::from_now(Duration::from_secs(VALIDITY_SECS))
        .map_err(|e| KeyStoreInitError::Signing(e.to_string()))?;

    let spki_der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| KeyStoreInitError::Signing(e.to_string()))?;
    let spki = SubjectPublicKeyInfoOwned::try_from(spki_der.as_bytes())
        .map_err(|e| KeyStoreInitError::Signing(e.to_string()))?;

    let signer: SigningKey<Sha1> = SigningKey::new(key.clone());

    let builder = CertificateBuilder::new(
        // Issuer None: issuer is taken from the subject, self-signed.
        Profile::Manual { issuer: None },
        serial_number,
        validity,
        subject,
        spki,
        &signer,
    )
    .map_err(|e| KeyStoreInitError::Signing(e.to_string()))?;

    let certificate = builder
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(|e| KeyStoreInitError::Signing(e.to_string()))?;

    debug!("Forged self-signed certificate ({} bit RSA)", RSA_KEY_BITS);

    Ok(certificate)
}

fn generated_dn() -> Result<Name, KeyStoreInitError> {
    Name::from_str(GENERATED_DN).map_err(|e| KeyStoreInitError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Encode;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::pkcs8::DecodePublicKey;
    use rsa::signature::Verifier;
    use rsa::RsaPublicKey;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn forge() -> Certificate {
        let key = generate_key_pair().expect("key generation");
        forge_certificate(&key).expect("certificate forge")
    }

    #[test]
    fn test_subject_equals_issuer_equals_fixed_dn() {
        let cert = forge();
        let expected = Name::from_str(GENERATED_DN).unwrap();

        assert_eq!(cert.tbs_certificate.subject, expected);
        assert_eq!(cert.tbs_certificate.issuer, cert.tbs_certificate.subject);
    }

    #[test]
    fn test_validity_spans_fifty_years_from_now() {
        let called_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let cert = forge();

        let not_before = cert
            .tbs_certificate
            .validity
            .not_before
            .to_unix_duration()
            .as_secs();
        let not_after = cert
            .tbs_certificate
            .validity
            .not_after
            .to_unix_duration()
            .as_secs();

        assert_eq!(not_after - not_before, VALIDITY_SECS);
        assert!(
            not_before.abs_diff(called_at) < 300,
            "notBefore should be close to the generation call"
        );
    }

    #[test]
    fn test_declared_algorithm_matches_signature_algorithm() {
        let cert = forge();

        assert_eq!(cert.tbs_certificate.signature, cert.signature_algorithm);
        assert_eq!(
            cert.signature_algorithm.oid.to_string(),
            "1.2.840.113549.1.1.5",
            "expected sha1WithRSAEncryption"
        );
    }

    #[test]
    fn test_self_signature_verifies_with_embedded_public_key() {
        let cert = forge();

        let spki_der = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .unwrap();
        let public_key = RsaPublicKey::from_public_key_der(&spki_der).expect("embedded public key");
        let verifying_key = VerifyingKey::<Sha1>::new(public_key);

        let tbs_der = cert.tbs_certificate.to_der().unwrap();
        let signature = Signature::try_from(cert.signature.raw_bytes()).expect("signature bytes");

        verifying_key
            .verify(&tbs_der, &signature)
            .expect("self-signature must verify against the embedded key");
    }

    #[test]
    fn test_serial_is_non_negative() {
        let cert = forge();
        let serial = cert.tbs_certificate.serial_number.as_bytes();

        assert!(!serial.is_empty());
        assert_eq!(serial[0] & 0x80, 0, "serial must encode a non-negative value");
    }

    #[test]
    fn test_serials_differ_between_forges() {
        let key = generate_key_pair().unwrap();
        let first = forge_certificate(&key).unwrap();
        let second = forge_certificate(&key).unwrap();

        assert_ne!(
            first.tbs_certificate.serial_number,
            second.tbs_certificate.serial_number
        );
    }
}
