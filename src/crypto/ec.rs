//! secp521r1 key generation, ECDH, raw point encoding, and the
//! exchange-key KDF.

use p521::elliptic_curve::sec1::ToEncodedPoint;
use p521::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Raw affine coordinates, each zero-left-padded to the field size (66
/// bytes for secp521r1).
pub const COORD_LEN: usize = 66;
pub const RAW_PUBKEY_LEN: usize = 2 * COORD_LEN;
pub const SHARED_SECRET_LEN: usize = COORD_LEN;
pub const EXCHANGE_KEY_LEN: usize = 32;

pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

/// Generates a fresh secp521r1 key pair.
pub fn generate_key_pair() -> Result<KeyPair, CryptoError> {
    let secret = SecretKey::random(&mut rand_core::OsRng);
    let public = secret.public_key();
    Ok(KeyPair { secret, public })
}

/// Raw, big-endian, zero-padded affine `(x, y)` encoding of a public key.
pub fn raw_public_key(public: &PublicKey) -> [u8; RAW_PUBKEY_LEN] {
    let point = public.to_encoded_point(false);
    let x = point.x().expect("uncompressed point always has x");
    let y = point.y().expect("uncompressed point always has y");

    let mut out = [0u8; RAW_PUBKEY_LEN];
    out[..COORD_LEN].copy_from_slice(x.as_slice());
    out[COORD_LEN..].copy_from_slice(y.as_slice());
    out
}

/// Raw curve-scalar ECDH shared secret (66 bytes on secp521r1).
pub fn derive_shared_secret(
    secret: &SecretKey,
    public: &PublicKey,
) -> Result<[u8; SHARED_SECRET_LEN], CryptoError> {
    let shared = p521::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let bytes = shared.raw_secret_bytes();
    if bytes.len() != SHARED_SECRET_LEN {
        return Err(CryptoError::Derive(format!(
            "unexpected ECDH shared secret length {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; SHARED_SECRET_LEN];
    out.copy_from_slice(bytes.as_slice());
    Ok(out)
}

/// NIST SP 800-56A single-step KDF with a one-block counter:
/// `SHA-256(raw_shared ‖ 0x00000001)`.
///
/// The 66-byte shared secret is conceptually padded with the 4-byte
/// big-endian counter `1` appended directly (no extra padding bytes in
/// between): bytes 0..66 are the shared secret, bytes 66..70 are
/// `00 00 00 01`.
pub fn exchange_key(
    secret: &SecretKey,
    public: &PublicKey,
) -> Result<[u8; EXCHANGE_KEY_LEN], CryptoError> {
    let shared = derive_shared_secret(secret, public)?;

    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(1u32.to_be_bytes());
    let digest = hasher.finalize();

    let mut out = [0u8; EXCHANGE_KEY_LEN];
    out.copy_from_slice(&digest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_key_is_symmetric() {
        let a = generate_key_pair().unwrap();
        let b = generate_key_pair().unwrap();

        let k_ab = exchange_key(&a.secret, &b.public).unwrap();
        let k_ba = exchange_key(&b.secret, &a.public).unwrap();

        assert_eq!(k_ab, k_ba);
    }

    #[test]
    fn raw_public_key_is_fixed_length() {
        let pair = generate_key_pair().unwrap();
        let raw = raw_public_key(&pair.public);
        assert_eq!(raw.len(), RAW_PUBKEY_LEN);
    }
}
