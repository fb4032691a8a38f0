//! AES-256-GCM seal/open with a 16-byte detached tag.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypts `plaintext` in place and returns the 16-byte authentication
/// tag. `aad` need not be block-aligned; `plaintext` need not either.
pub fn seal(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; TAG_LEN], CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    let tag = cipher
        .encrypt_in_place_detached(nonce, aad, buffer)
        .map_err(|_| CryptoError::Internal("AES-GCM seal failed"))?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

/// Decrypts `buffer` in place, verifying `tag` over `aad ‖ buffer`.
/// Returns [`CryptoError::Verification`] if the tag does not match.
pub fn open(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8; TAG_LEN],
) -> Result<(), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    let tag = aes_gcm::Tag::from_slice(tag);
    cipher
        .decrypt_in_place_detached(nonce, aad, buffer, tag)
        .map_err(|_| CryptoError::Verification)
}

/// Convenience wrapper returning a freshly allocated ciphertext + tag,
/// used for the per-host key-slot wrap where the plaintext is the
/// 32-byte customer root key.
pub fn seal_owned(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let mut buffer = plaintext.to_vec();
    let tag = seal(key, iv, aad, &mut buffer)?;
    Ok((buffer, tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [0x11u8; KEY_LEN];
        let iv = [0x22u8; IV_LEN];
        let aad = b"header-aad";
        let mut buffer = b"the secret root key material...".to_vec();
        let original = buffer.clone();

        let tag = seal(&key, &iv, aad, &mut buffer).unwrap();
        assert_ne!(buffer, original);

        open(&key, &iv, aad, &mut buffer, &tag).unwrap();
        assert_eq!(buffer, original);
    }

    #[test]
    fn open_rejects_tampered_aad() {
        let key = [0x33u8; KEY_LEN];
        let iv = [0x44u8; IV_LEN];
        let mut buffer = b"payload".to_vec();
        let tag = seal(&key, &iv, b"aad-a", &mut buffer).unwrap();

        let err = open(&key, &iv, b"aad-b", &mut buffer, &tag).unwrap_err();
        assert!(matches!(err, CryptoError::Verification));
    }
}
