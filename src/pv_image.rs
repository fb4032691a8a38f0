//! `PvImage`: owns key material, the stage-3a template, and the component
//! list; orchestrates construction end to end.
//!
//! A struct assembled via a fallible constructor from a config value,
//! populated incrementally by the driver, then consumed by a single
//! finishing step (`finalize` + `write`), rather than a `TryFrom` into a
//! trait object, since there is exactly one concrete output shape.

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::buffer::page_align_addr;
use crate::cert;
use crate::component::{Component, ComponentType, PrepareMode};
use crate::component_list::ComponentList;
use crate::crypto::{ec, gcm, random, xts};
use crate::error::{CryptoError, GenprotimgError, ImageError, ParseError};
use crate::pv_header::{self, EncryptedFields, KeySlot, PvHeader};
use crate::scratch::ScratchDir;
use crate::stage3a;
use crate::writer;

/// `PSW_MASK_EA | PSW_MASK_BA`: the 31-bit-addressing-mode, extended
/// addressing PSW base mask every PSW in this format starts from.
pub const PSW_MASK_EA_BA: u64 = 0x0000_0001_8000_0000;
/// Default guest kernel entry address when `--x-psw` is not given.
pub const DEFAULT_PSW_ADDR: u64 = 0x0001_0000;
/// `PCF_NO_DECRYPTION`: components are page-padded but never XTS-encrypted.
pub const PCF_NO_DECRYPTION: u64 = 0x1000_0000;

/// Everything the driver has gathered from the CLI and filesystem before a
/// `PvImage` can be constructed.
pub struct PvImageConfig<'a> {
    pub pcf_hex: Option<&'a str>,
    pub scf_hex: Option<&'a str>,
    pub psw_hex: Option<&'a str>,
    pub header_key_path: Option<&'a Path>,
    pub comp_key_path: Option<&'a Path>,
    pub comm_key_path: Option<&'a Path>,
    pub host_keys: Vec<p521::PublicKey>,
    pub stage3a_template: Vec<u8>,
    pub stage3a_load_address: u64,
    /// Total components that will be added, stage-3b included. Must match
    /// the number actually passed to [`PvImage::add_component`] plus
    /// [`PvImage::append_stage3b`] by the time [`PvImage::finalize`] runs.
    pub component_count: usize,
}

pub struct PvImage {
    scratch: ScratchDir,
    cust_key: ec::KeyPair,
    host_keys: Vec<p521::PublicKey>,
    gcm_iv: [u8; gcm::IV_LEN],
    cust_root_key: Zeroizing<[u8; gcm::KEY_LEN]>,
    xts_key: Zeroizing<[u8; xts::KEY_LEN]>,
    cust_comm_key: Zeroizing<[u8; gcm::KEY_LEN]>,
    pcf: u64,
    scf: u64,
    psw_mask: u64,
    stage3a_template: Vec<u8>,
    stage3a_load_address: u64,
    key_slots: Vec<KeySlot>,
    comps: ComponentList,
    expected_component_count: usize,
    finalized: bool,
    stage3a_blob: Option<crate::buffer::Buffer>,
}

impl PvImage {
    /// Parses hex overrides, acquires or generates key material, generates
    /// the customer key pair, builds one key slot per host key, and
    /// reserves guest address space for the (not yet patched) stage-3a
    /// region.
    pub fn new(cfg: PvImageConfig<'_>) -> Result<Self, GenprotimgError> {
        if cfg.host_keys.is_empty() {
            return Err(ParseError::NoHostCertificate.into());
        }

        let pcf = match cfg.pcf_hex {
            Some(s) => parse_hex_u64("--x-pcf", s)?,
            None => 0,
        };
        let scf = match cfg.scf_hex {
            Some(s) => parse_hex_u64("--x-scf", s)?,
            None => 0,
        };
        let psw_mask = match cfg.psw_hex {
            Some(s) => parse_hex_u64("--x-psw", s)?,
            None => PSW_MASK_EA_BA,
        };

        let xts_key = Zeroizing::new(match cfg.comp_key_path {
            Some(p) => read_exact_key::<{ xts::KEY_LEN }>("comp-key", p)?,
            None => random::bytes_array::<{ xts::KEY_LEN }>().map_err(GenprotimgError::Crypto)?,
        });
        let cust_comm_key = Zeroizing::new(match cfg.comm_key_path {
            Some(p) => read_exact_key::<{ gcm::KEY_LEN }>("x-comm-key", p)?,
            None => random::bytes_array::<{ gcm::KEY_LEN }>().map_err(GenprotimgError::Crypto)?,
        });
        let cust_root_key = Zeroizing::new(match cfg.header_key_path {
            Some(p) => read_exact_key::<{ gcm::KEY_LEN }>("header-key", p)?,
            None => random::bytes_array::<{ gcm::KEY_LEN }>().map_err(GenprotimgError::Crypto)?,
        });
        let gcm_iv =
            random::bytes_array::<{ gcm::IV_LEN }>().map_err(GenprotimgError::Crypto)?;

        let cust_key = ec::generate_key_pair().map_err(GenprotimgError::Crypto)?;

        let mut key_slots = Vec::with_capacity(cfg.host_keys.len());
        for host_pub in &cfg.host_keys {
            key_slots.push(KeySlot::build(
                &cust_key.secret,
                host_pub,
                &cust_root_key,
                &gcm_iv,
            )?);
        }

        let (ipib_off, hdr_off) = stage3a::read_template_offsets(&cfg.stage3a_template)?;
        let ipib_len = stage3a::ipib_byte_len(cfg.component_count) as u64;
        let hdr_len = pv_header::size_for_nks(cfg.host_keys.len() as u64);
        let reserved = (cfg.stage3a_template.len() as u64)
            .max(ipib_off + ipib_len)
            .max(hdr_off + hdr_len);

        let mut comps = ComponentList::new();
        comps.set_offset(page_align_addr(cfg.stage3a_load_address + reserved))?;

        Ok(Self {
            scratch: ScratchDir::new(),
            cust_key,
            host_keys: cfg.host_keys,
            gcm_iv,
            cust_root_key,
            xts_key,
            cust_comm_key,
            pcf,
            scf,
            psw_mask,
            stage3a_template: cfg.stage3a_template,
            stage3a_load_address: cfg.stage3a_load_address,
            key_slots,
            comps,
            expected_component_count: cfg.component_count,
            finalized: false,
            stage3a_blob: None,
        })
    }

    /// Prepares (page-pads, and unless `PCF_NO_DECRYPTION` is set,
    /// XTS-encrypts) `comp` and appends it to the component list.
    pub fn add_component(&mut self, mut comp: Component) -> Result<(), GenprotimgError> {
        let mode = if self.pcf & PCF_NO_DECRYPTION != 0 {
            PrepareMode::NoDecryption
        } else {
            PrepareMode::Encrypt(&self.xts_key)
        };
        comp.prepare(&mode, &mut self.scratch)?;
        self.comps.add(comp)
    }

    /// Builds and appends the stage-3b component from its plaintext bytes.
    /// Must be the last component added.
    pub fn append_stage3b(&mut self, data: &[u8]) -> Result<(), GenprotimgError> {
        let comp = Component::new_buf(ComponentType::Stage3b, data)?;
        self.add_component(comp)
    }

    pub fn host_keys(&self) -> &[p521::PublicKey] {
        &self.host_keys
    }

    /// Computes the payload digests, builds and seals the PV header, and
    /// patches the stage-3a template with the final IPIB and header bytes.
    /// No further component may be added afterwards.
    pub fn finalize(&mut self) -> Result<(), GenprotimgError> {
        if self.finalized {
            return Err(ImageError::Finalized.into());
        }
        if self.comps.components().len() != self.expected_component_count {
            return Err(ImageError::Internal(
                "component count at finalize does not match the count PvImage::new reserved space for",
            )
            .into());
        }

        self.comps.finalize()?;
        let digests = self
            .comps
            .digests()
            .ok_or(ImageError::Internal("digests missing right after a successful finalize"))?;

        let stage3b_addr = self
            .comps
            .components()
            .iter()
            .find(|c| c.ty == ComponentType::Stage3b)
            .map(|c| c.src_addr)
            .ok_or(ImageError::Internal("no stage3b component present at finalize"))?;

        let mut img_enc_key_1 = [0u8; 32];
        let mut img_enc_key_2 = [0u8; 32];
        img_enc_key_1.copy_from_slice(&self.xts_key[..32]);
        img_enc_key_2.copy_from_slice(&self.xts_key[32..]);

        let header = PvHeader {
            iv: self.gcm_iv,
            nks: self.key_slots.len() as u64,
            nep: self.comps.nep(),
            pcf: self.pcf,
            cust_pub_key: ec::raw_public_key(&self.cust_key.public),
            pld: digests.pld,
            ald: digests.ald,
            tld: digests.tld,
            slots: self.key_slots.clone(),
            encrypted: EncryptedFields {
                cust_comm_key: *self.cust_comm_key,
                img_enc_key_1,
                img_enc_key_2,
                psw_mask: self.psw_mask,
                psw_addr: stage3b_addr,
                scf: self.scf,
            },
        };

        let header_bytes = header.seal(&self.cust_root_key)?;

        let (_, hdr_off) = stage3a::read_template_offsets(&self.stage3a_template)?;
        let pv_header_addr = self.stage3a_load_address + hdr_off;
        let ipib = stage3a::build_ipib(self.comps.components(), pv_header_addr, header_bytes.len() as u64);
        debug_assert_eq!(
            ipib.len(),
            stage3a::ipib_byte_len(self.comps.components().len())
        );

        let blob = stage3a::patch(&self.stage3a_template, &ipib, &header_bytes)?;
        self.stage3a_blob = Some(blob);
        self.finalized = true;
        Ok(())
    }

    /// Writes the finished image to `output_path`. Only meaningful after
    /// [`PvImage::finalize`].
    pub fn write(&self, output_path: &Path) -> Result<(), GenprotimgError> {
        let blob = self
            .stage3a_blob
            .as_ref()
            .ok_or(ImageError::Internal("write called before finalize"))?;

        writer::write_image(
            output_path,
            self.stage3a_load_address,
            blob,
            PSW_MASK_EA_BA,
            self.stage3a_load_address,
            self.comps.components(),
        )
    }
}

/// Loads host certificates with the given verifier, requiring at least
/// one.
pub fn load_host_keys(
    paths: &[PathBuf],
    verifier: &dyn cert::CertVerifier,
) -> Result<Vec<p521::PublicKey>, GenprotimgError> {
    if paths.is_empty() {
        return Err(ParseError::NoHostCertificate.into());
    }
    cert::load_host_keys(paths, verifier)
}

fn read_exact_key<const N: usize>(name: &'static str, path: &Path) -> Result<[u8; N], GenprotimgError> {
    let data = std::fs::read(path).map_err(|source| crate::error::IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if data.len() != N {
        return Err(CryptoError::InvalidKeySize {
            name,
            expected: N,
            actual: data.len(),
        }
        .into());
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&data);
    Ok(out)
}

/// Parses a strict hexadecimal (optionally `0x`-prefixed) `u64` override.
fn parse_hex_u64(option: &'static str, raw: &str) -> Result<u64, GenprotimgError> {
    let trimmed = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidHex {
            option,
            value: raw.to_string(),
        }
        .into());
    }
    u64::from_str_radix(trimmed, 16).map_err(|_| {
        ParseError::InvalidHex {
            option,
            value: raw.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_template() -> Vec<u8> {
        // Room for IPIB right after a tiny header, and the PV header a
        // page later; `finalize` will still grow the buffer if these
        // guesses run short.
        let mut t = vec![0u8; 64];
        t[0..8].copy_from_slice(&64u64.to_be_bytes());
        t[8..16].copy_from_slice(&4096u64.to_be_bytes());
        t
    }

    fn no_override_cfg<'a>(host_keys: Vec<p521::PublicKey>, template: Vec<u8>) -> PvImageConfig<'a> {
        PvImageConfig {
            pcf_hex: None,
            scf_hex: None,
            psw_hex: None,
            header_key_path: None,
            comp_key_path: None,
            comm_key_path: None,
            host_keys,
            stage3a_template: template,
            stage3a_load_address: 0x1000,
            component_count: 2, // kernel + stage3b
        }
    }

    #[test]
    fn rejects_empty_host_key_list() {
        let cfg = no_override_cfg(vec![], fake_template());
        assert!(PvImage::new(cfg).is_err());
    }

    #[test]
    fn rejects_malformed_hex_override() {
        let host = ec::generate_key_pair().unwrap();
        let mut cfg = no_override_cfg(vec![host.public], fake_template());
        cfg.pcf_hex = Some("not-hex");
        assert!(PvImage::new(cfg).is_err());
    }

    #[test]
    fn end_to_end_build_and_write_roundtrips_components() {
        use std::io::Read;

        let host = ec::generate_key_pair().unwrap();
        let cfg = no_override_cfg(vec![host.public], fake_template());
        let mut image = PvImage::new(cfg).unwrap();

        let kernel = Component::new_buf(ComponentType::Kernel, b"not-an-elf-kernel").unwrap();
        image.add_component(kernel).unwrap();
        image.append_stage3b(b"stage3b-code").unwrap();

        image.finalize().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.img");
        image.write(&out_path).unwrap();

        let mut file = std::fs::File::open(&out_path).unwrap();
        let mut all = Vec::new();
        file.read_to_end(&mut all).unwrap();
        // Short PSW at offset 0 must carry the short-PSW marker bit.
        let short = u64::from_be_bytes(all[0..8].try_into().unwrap());
        assert_ne!(short & (1u64 << (63 - 12)), 0);
    }

    #[test]
    fn finalize_rejects_component_count_mismatch() {
        let host = ec::generate_key_pair().unwrap();
        let cfg = no_override_cfg(vec![host.public], fake_template());
        let mut image = PvImage::new(cfg).unwrap();

        let kernel = Component::new_buf(ComponentType::Kernel, b"kernel").unwrap();
        image.add_component(kernel).unwrap();
        // Never append stage3b: component_count (2) won't match.

        assert!(image.finalize().is_err());
    }
}
