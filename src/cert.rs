//! Host certificate loading and trust verification.
//!
//! Verification is a pluggable trait so a trust-root/CRL-backed verifier
//! can be dropped in later without touching [`crate::pv_image::PvImage`].
//! Only the "no verification at all" implementation exists today; the
//! driver refuses to run without `--no-cert-check`.

use std::fs;
use std::path::{Path, PathBuf};

use const_oid::ObjectIdentifier;
use der::{Decode, DecodePem};
use x509_cert::Certificate;

use crate::crypto::CurveId;
use crate::error::{CryptoError, GenprotimgError};

/// secp521r1 / NIST P-521, OID 1.3.132.0.35.
const SECP521R1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");

/// A pluggable trust check run against a parsed certificate before its
/// public key is extracted.
pub trait CertVerifier {
    fn verify(&self, cert: &Certificate) -> Result<(), CryptoError>;
}

/// The only verifier this crate ships: accepts any certificate. Selected
/// when the caller passes `--no-cert-check`, matching current upstream
/// behaviour.
pub struct NoCertCheck;

impl CertVerifier for NoCertCheck {
    fn verify(&self, _cert: &Certificate) -> Result<(), CryptoError> {
        Ok(())
    }
}

/// Reads a PEM X.509 certificate from `path`, verifies it with
/// `verifier`, and extracts its public key, rejecting it unless it lies
/// on secp521r1.
pub fn load_ec_pubkey_cert(
    path: &Path,
    verifier: &dyn CertVerifier,
) -> Result<p521::PublicKey, GenprotimgError> {
    let pem = fs::read_to_string(path).map_err(|e| {
        GenprotimgError::Crypto(CryptoError::ReadCertificate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })?;

    let cert = Certificate::from_pem(pem.as_bytes()).map_err(|e| {
        GenprotimgError::Crypto(CryptoError::ReadCertificate {
            path: path.to_path_buf(),
            reason: format!("invalid X.509 PEM: {e}"),
        })
    })?;

    verifier.verify(&cert).map_err(GenprotimgError::Crypto)?;

    let spki = &cert.tbs_certificate.subject_public_key_info;
    let oid = spki
        .algorithm
        .parameters
        .as_ref()
        .ok_or_else(|| curve_mismatch(path))?
        .decode_as::<ObjectIdentifier>()
        .map_err(|_| curve_mismatch(path))?;

    if oid != SECP521R1_OID {
        return Err(curve_mismatch(path));
    }

    let raw_point = spki.subject_public_key.raw_bytes();
    p521::PublicKey::from_sec1_bytes(raw_point).map_err(|e| {
        GenprotimgError::Crypto(CryptoError::ReadCertificate {
            path: path.to_path_buf(),
            reason: format!("invalid EC point: {e}"),
        })
    })
}

fn curve_mismatch(path: &Path) -> GenprotimgError {
    GenprotimgError::Crypto(CryptoError::ReadCertificate {
        path: path.to_path_buf(),
        reason: format!("public key is not on curve {}", CurveId::Secp521r1),
    })
}

/// Loads every `-c/--host-certificate` path, failing the whole batch if
/// any single certificate fails to load or verify.
pub fn load_host_keys(
    paths: &[PathBuf],
    verifier: &dyn CertVerifier,
) -> Result<Vec<p521::PublicKey>, GenprotimgError> {
    paths
        .iter()
        .map(|p| load_ec_pubkey_cert(p, verifier))
        .collect()
}

