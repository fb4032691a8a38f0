//! The fixed, big-endian, partly-encrypted PV header record.

use crate::crypto::ec;
use crate::crypto::gcm;
use crate::endian::{put_u32_be, put_u64_be};
use crate::error::{CryptoError, GenprotimgError};

pub const MAGIC: [u8; 8] = *b"IBMSecEx";
pub const VERSION: u32 = 0x0000_0100;

/// `digest_key[32] ‖ wrapped_key[32] ‖ tag[16]`, 80 bytes on disk.
#[derive(Clone)]
pub struct KeySlot {
    pub digest_key: [u8; 32],
    pub wrapped_key: [u8; 32],
    pub tag: [u8; gcm::TAG_LEN],
}

pub const KEY_SLOT_LEN: usize = 32 + 32 + gcm::TAG_LEN;
static_assertions::const_assert_eq!(KEY_SLOT_LEN, 80);

impl KeySlot {
    /// Builds the key slot for one host public key:
    /// `digest_key = SHA-256(raw(H))`, `exchange = exchange_key(cust_priv,
    /// H)`, then GCM-wraps `cust_root_key` (no AAD) with `exchange` and
    /// the header's `gcm_iv`.
    pub fn build(
        cust_secret: &p521::SecretKey,
        host_public: &p521::PublicKey,
        cust_root_key: &[u8; gcm::KEY_LEN],
        gcm_iv: &[u8; gcm::IV_LEN],
    ) -> Result<Self, GenprotimgError> {
        let raw_host = ec::raw_public_key(host_public);
        let digest_key = crate::crypto::digest::sha256(&raw_host);

        let exchange = ec::exchange_key(cust_secret, host_public)
            .map_err(GenprotimgError::Crypto)?;

        let (wrapped, tag) = gcm::seal_owned(&exchange, gcm_iv, &[], cust_root_key)
            .map_err(GenprotimgError::Crypto)?;

        let mut wrapped_key = [0u8; 32];
        wrapped_key.copy_from_slice(&wrapped);

        Ok(Self {
            digest_key,
            wrapped_key,
            tag,
        })
    }

    /// Recovers `cust_root_key` given the host's private key and the
    /// customer's public key used to build this slot. Used by the
    /// key-slot round-trip test and by any future runtime verifier.
    pub fn recover(
        &self,
        host_secret: &p521::SecretKey,
        cust_public: &p521::PublicKey,
        gcm_iv: &[u8; gcm::IV_LEN],
    ) -> Result<[u8; gcm::KEY_LEN], GenprotimgError> {
        let exchange =
            ec::exchange_key(host_secret, cust_public).map_err(GenprotimgError::Crypto)?;
        let mut buffer = self.wrapped_key.to_vec();
        gcm::open(&exchange, gcm_iv, &[], &mut buffer, &self.tag)
            .map_err(GenprotimgError::Crypto)?;
        let mut out = [0u8; gcm::KEY_LEN];
        out.copy_from_slice(&buffer);
        Ok(out)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.digest_key);
        out.extend_from_slice(&self.wrapped_key);
        out.extend_from_slice(&self.tag);
    }
}

/// Plaintext fields carried inside the encrypted section.
pub struct EncryptedFields {
    pub cust_comm_key: [u8; 32],
    pub img_enc_key_1: [u8; 32],
    pub img_enc_key_2: [u8; 32],
    pub psw_mask: u64,
    pub psw_addr: u64,
    pub scf: u64,
}

/// The full, AAD-protected, partly-encrypted on-disk PV header.
pub struct PvHeader {
    pub iv: [u8; gcm::IV_LEN],
    pub nks: u64,
    pub nep: u64,
    pub pcf: u64,
    pub cust_pub_key: [u8; ec::RAW_PUBKEY_LEN],
    pub pld: [u8; 64],
    pub ald: [u8; 64],
    pub tld: [u8; 64],
    pub slots: Vec<KeySlot>,
    pub encrypted: EncryptedFields,
}

impl PvHeader {
    /// Serialises and GCM-seals the header in a single pass: AAD is
    /// `head ‖ slots`, ciphertext is the `encrypted`/optional-items
    /// region (padded to a multiple of 16 bytes), and the tag is appended
    /// last. Returns the final byte buffer.
    pub fn seal(&self, cust_root_key: &[u8; gcm::KEY_LEN]) -> Result<Vec<u8>, GenprotimgError> {
        let mut encrypted_region = Vec::new();
        encrypted_region.extend_from_slice(&self.encrypted.cust_comm_key);
        encrypted_region.extend_from_slice(&self.encrypted.img_enc_key_1);
        encrypted_region.extend_from_slice(&self.encrypted.img_enc_key_2);
        put_u64_be(&mut encrypted_region, self.encrypted.psw_mask);
        put_u64_be(&mut encrypted_region, self.encrypted.psw_addr);
        put_u64_be(&mut encrypted_region, self.encrypted.scf);
        put_u32_be(&mut encrypted_region, 0); // noi: no optional items in v1
        put_u32_be(&mut encrypted_region, 0); // res2

        // Pad to a multiple of 16 bytes, `sea`'s required alignment.
        let rem = encrypted_region.len() % 16;
        if rem != 0 {
            encrypted_region.resize(encrypted_region.len() + (16 - rem), 0);
        }
        let sea = encrypted_region.len() as u64;
        debug_assert!(sea >= ENCRYPTED_FIELDS_LEN as u64);
        debug_assert_eq!(sea % 16, 0);

        let phs = head_len() as u64 + self.nks * KEY_SLOT_LEN as u64 + sea + gcm::TAG_LEN as u64;

        let mut head = Vec::with_capacity(head_len());
        head.extend_from_slice(&MAGIC);
        put_u32_be(&mut head, VERSION);
        put_u32_be(&mut head, phs as u32);
        head.extend_from_slice(&self.iv);
        put_u32_be(&mut head, 0); // res1
        put_u64_be(&mut head, self.nks);
        put_u64_be(&mut head, sea);
        put_u64_be(&mut head, self.nep);
        put_u64_be(&mut head, self.pcf);
        head.extend_from_slice(&self.cust_pub_key);
        head.extend_from_slice(&self.pld);
        head.extend_from_slice(&self.ald);
        head.extend_from_slice(&self.tld);
        debug_assert_eq!(head.len(), head_len());

        let mut slots = Vec::with_capacity(self.slots.len() * KEY_SLOT_LEN);
        for slot in &self.slots {
            slot.write_to(&mut slots);
        }

        let mut aad = head.clone();
        aad.extend_from_slice(&slots);

        let tag = gcm::seal(cust_root_key, &self.iv, &aad, &mut encrypted_region)
            .map_err(GenprotimgError::Crypto)?;

        let mut out = aad;
        out.extend_from_slice(&encrypted_region);
        out.extend_from_slice(&tag);
        debug_assert_eq!(out.len() as u64, phs);
        Ok(out)
    }

    /// Total serialised header size (`phs`), computable before sealing.
    pub fn total_size(&self) -> u64 {
        size_for_nks(self.nks)
    }
}

/// Unpadded size of the `encrypted` region `seal()` serialises:
/// `cust_comm_key(32) + img_enc_key_1(32) + img_enc_key_2(32) +
/// psw_mask(8) + psw_addr(8) + scf(8) + noi(4) + res2(4)`. Already a
/// multiple of 16, but routed through [`round_up_16`] anyway so this stays
/// correct if an odd-sized field is ever added.
const ENCRYPTED_FIELDS_LEN: usize = 32 + 32 + 32 + 8 + 8 + 8 + 4 + 4;

/// `phs` for a header with `nks` key slots and no optional items (v1: `sea`
/// is always the fixed, padded encrypted-fields region). Lets callers size
/// storage for a header before one is fully populated.
pub fn size_for_nks(nks: u64) -> u64 {
    head_len() as u64
        + nks * KEY_SLOT_LEN as u64
        + round_up_16(ENCRYPTED_FIELDS_LEN as u64)
        + gcm::TAG_LEN as u64
}

fn round_up_16(n: u64) -> u64 {
    (n + 15) & !15
}

/// Fixed size of the `head` (AAD-only, unencrypted) region: magic(8) +
/// version(4) + phs(4) + iv(12) + res1(4) + nks(8) + sea(8) + nep(8) +
/// pcf(8) + cust_pub_key(132) + pld(64) + ald(64) + tld(64).
pub(crate) const fn head_len() -> usize {
    8 + 4 + 4 + 12 + 4 + 8 + 8 + 8 + 8 + ec::RAW_PUBKEY_LEN + 64 + 64 + 64
}

static_assertions::const_assert_eq!(head_len(), 388);

/// Verifies the tag over a previously sealed header and decrypts the
/// encrypted region in place, returning the plaintext bytes. Used by the
/// header round-trip test.
pub fn open_and_verify(
    sealed: &[u8],
    cust_root_key: &[u8; gcm::KEY_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < head_len() + gcm::TAG_LEN {
        return Err(CryptoError::Internal("sealed header too short"));
    }
    let iv_start = 8 + 4 + 4;
    let iv: [u8; gcm::IV_LEN] = sealed[iv_start..iv_start + gcm::IV_LEN]
        .try_into()
        .unwrap();

    let (aad_and_ct, tag_bytes) = sealed.split_at(sealed.len() - gcm::TAG_LEN);
    let tag: [u8; gcm::TAG_LEN] = tag_bytes.try_into().unwrap();

    // AAD is `phs - sea - 16` bytes (head ‖ slots); recompute it from the
    // header fields rather than trusting an external caller.
    let nks_start = 8 + 4 + 4 + 12 + 4;
    let nks = u64::from_be_bytes(sealed[nks_start..nks_start + 8].try_into().unwrap());
    let sea_start = nks_start + 8;
    let sea = u64::from_be_bytes(sealed[sea_start..sea_start + 8].try_into().unwrap());

    let aad_len = head_len() + nks as usize * KEY_SLOT_LEN;
    let (aad, ciphertext) = aad_and_ct.split_at(aad_len);
    debug_assert_eq!(ciphertext.len() as u64, sea);

    let mut buffer = ciphertext.to_vec();
    gcm::open(cust_root_key, &iv, aad, &mut buffer, &tag)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ec;

    fn header(slots: Vec<KeySlot>, cust_pub: [u8; ec::RAW_PUBKEY_LEN]) -> PvHeader {
        PvHeader {
            iv: [9u8; gcm::IV_LEN],
            nks: slots.len() as u64,
            nep: 3,
            pcf: 0,
            cust_pub_key: cust_pub,
            pld: [1u8; 64],
            ald: [2u8; 64],
            tld: [3u8; 64],
            slots,
            encrypted: EncryptedFields {
                cust_comm_key: [4u8; 32],
                img_enc_key_1: [5u8; 32],
                img_enc_key_2: [6u8; 32],
                psw_mask: 0x0000_0001_8000_0000,
                psw_addr: 0x1234,
                scf: 0,
            },
        }
    }

    #[test]
    fn header_round_trip() {
        let cust = ec::generate_key_pair().unwrap();
        let host = ec::generate_key_pair().unwrap();
        let cust_root_key = [0x77u8; gcm::KEY_LEN];
        let gcm_iv = [9u8; gcm::IV_LEN];

        let slot = KeySlot::build(&cust.secret, &host.public, &cust_root_key, &gcm_iv).unwrap();
        let hdr = header(vec![slot], ec::raw_public_key(&cust.public));

        let sealed = hdr.seal(&cust_root_key).unwrap();
        assert_eq!(sealed.len() as u64, hdr.total_size());

        let opened = open_and_verify(&sealed, &cust_root_key).unwrap();
        assert_eq!(&opened[0..32], &hdr.encrypted.cust_comm_key);
    }

    #[test]
    fn key_slot_round_trip_recovers_root_key() {
        let cust = ec::generate_key_pair().unwrap();
        let host = ec::generate_key_pair().unwrap();
        let cust_root_key = [0x99u8; gcm::KEY_LEN];
        let gcm_iv = [1u8; gcm::IV_LEN];

        let slot = KeySlot::build(&cust.secret, &host.public, &cust_root_key, &gcm_iv).unwrap();
        let recovered = slot.recover(&host.secret, &cust.public, &gcm_iv).unwrap();
        assert_eq!(recovered, cust_root_key);
    }

    #[test]
    fn tampered_tag_fails_open() {
        let cust = ec::generate_key_pair().unwrap();
        let host = ec::generate_key_pair().unwrap();
        let cust_root_key = [0x11u8; gcm::KEY_LEN];
        let gcm_iv = [2u8; gcm::IV_LEN];
        let slot = KeySlot::build(&cust.secret, &host.public, &cust_root_key, &gcm_iv).unwrap();
        let hdr = header(vec![slot], ec::raw_public_key(&cust.public));
        let mut sealed = hdr.seal(&cust_root_key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open_and_verify(&sealed, &cust_root_key).is_err());
    }
}
