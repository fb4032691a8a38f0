//! Cryptographic primitives used to build a PV image.
//!
//! All AES operations are 256-bit. This module is a thin, typed layer over
//! RustCrypto crates (`aes-gcm`, `aes` + `xts-mode`, `p521`, `sha2`,
//! `rand`); it does not implement any primitive itself.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`gcm`] | AES-256-GCM seal/open with a detached 16-byte tag |
//! | [`xts`] | AES-256-XTS stream encryption with per-page tweak advance |
//! | [`ec`] | secp521r1 key generation, ECDH, raw point encoding, exchange-key KDF |
//! | [`digest`] | Incremental SHA-256 / SHA-512 |
//! | [`random`] | CSPRNG bytes and tweak generation |

pub mod digest;
pub mod ec;
pub mod gcm;
pub mod random;
pub mod xts;

/// Curve/cipher identifiers fixed by this tool. Kept as an enum rather
/// than bare string constants so call sites can't typo an algorithm name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveId {
    Secp521r1,
}

impl std::fmt::Display for CurveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurveId::Secp521r1 => write!(f, "secp521r1"),
        }
    }
}
