//! Typed error domains.
//!
//! Each domain mirrors a failure category a caller might want to match on
//! (`PARSE`, `IMAGE`, `COMPONENT`, `CRYPTO`, `IO` in the on-disk spec's own
//! vocabulary). [`GenprotimgError`] unifies them for propagation up to the
//! driver, which converts the final value into an [`anyhow::Error`] with
//! call-site context.

use std::path::PathBuf;

/// Command-line / argument parsing failures.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("missing required option: {0}")]
    MissingOption(&'static str),
    #[error("option {0} given more than once")]
    DuplicateOption(&'static str),
    #[error("invalid hex value for {option}: {value:?}")]
    InvalidHex { option: &'static str, value: String },
    #[error("at least one host certificate is required (-c/--host-certificate)")]
    NoHostCertificate,
}

/// `PvImage`-level failures.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("cannot change the component offset after a component has been added")]
    OffsetAfterAdd,
    #[error("image is already finalized")]
    Finalized,
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Per-`Component` failures.
#[derive(thiserror::Error, Debug)]
pub enum ComponentError {
    #[error("operation requires a page-aligned, already-prepared component")]
    NotPrepared,
    #[error("kernel image looks like an ELF file; raw binary image required")]
    ElfRejected,
    #[error("{path}: size changed between stat and read (expected {expected}, got {actual})")]
    SizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Cryptographic primitive failures.
#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("cryptographic primitive initialization failed: {0}")]
    Init(String),
    #[error("AEAD verification failed")]
    Verification,
    #[error("failed to read certificate {path}: {reason}")]
    ReadCertificate { path: PathBuf, reason: String },
    #[error("host certificate {path} could not be verified without --no-cert-check")]
    VerificationDisabled { path: PathBuf },
    #[error("key derivation failed: {0}")]
    Derive(String),
    #[error("key generation failed: {0}")]
    Keygen(String),
    #[error("CSPRNG is not seeded or failed: {0}")]
    Randomization(String),
    #[error("invalid cryptographic parameter: {0}")]
    InvalidParam(&'static str),
    #[error("invalid key size for {name}: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("internal cryptographic error: {0}")]
    Internal(&'static str),
}

/// I/O failures distinguishing the operation that failed.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to seek in {path}: {source}")]
    Seek {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a regular file")]
    NotRegularFile { path: PathBuf },
    #[error("{path} is too large ({size} bytes)")]
    SizeTooLarge { path: PathBuf, size: u64 },
}

/// The union of every domain, returned by every fallible operation in this
/// crate's library surface.
#[derive(thiserror::Error, Debug)]
pub enum GenprotimgError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] IoError),
}

pub type Result<T> = std::result::Result<T, GenprotimgError>;
