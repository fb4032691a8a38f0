//! Incremental SHA-256 / SHA-512, used by the exchange-key digest and by
//! the component list's page/address/tweak digests respectively.

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 of `data`, as used for the per-host key-slot digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// A resumable SHA-512 hash builder, used for the pld/ald/tld digests
/// that accumulate across every component in a [`crate::component_list::ComponentList`].
#[derive(Clone, Default)]
pub struct Sha512Builder {
    hasher: Sha512,
}

impl Sha512Builder {
    pub fn new() -> Self {
        Self {
            hasher: Sha512::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> [u8; 64] {
        let out = self.hasher.finalize();
        let mut buf = [0u8; 64];
        buf.copy_from_slice(&out);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_incremental_matches_oneshot() {
        let mut incremental = Sha512Builder::new();
        incremental.update(b"hello, ");
        incremental.update(b"world");

        let mut oneshot = Sha512::new();
        oneshot.update(b"hello, world");

        assert_eq!(incremental.finalize()[..], oneshot.finalize()[..]);
    }
}
