//! A single payload piece (kernel / initrd / cmdline / stage3b),
//! file- or buffer-backed.
//!
//! Modelled as a tagged variant rather than a trait-object hierarchy,
//! the way a small closed set of storage alternatives is usually
//! represented when the set of cases is fixed and known up front.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::buffer::{Buffer, PAGE_SIZE};
use crate::crypto::{random, xts};
use crate::error::{ComponentError, CryptoError, IoError};
use crate::scratch::ScratchDir;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Components are fully buffered in memory (and, when file-backed, fully
/// re-read on every [`Component::prepare`]/digest pass), so a path this
/// large is almost certainly a wrong argument rather than a real guest
/// payload.
const MAX_COMPONENT_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ComponentType {
    Kernel = 0,
    Cmdline = 1,
    Initrd = 2,
    Stage3b = 3,
}

impl ComponentType {
    pub fn name(self) -> &'static str {
        match self {
            ComponentType::Kernel => "kernel",
            ComponentType::Cmdline => "parmfile",
            ComponentType::Initrd => "initrd",
            ComponentType::Stage3b => "stage3b",
        }
    }
}

#[derive(Debug)]
enum Storage {
    Buffer(Buffer),
    File { path: PathBuf, size: u64 },
}

impl Storage {
    fn len(&self) -> u64 {
        match self {
            Storage::Buffer(b) => b.len() as u64,
            Storage::File { size, .. } => *size,
        }
    }
}

/// How [`Component::prepare`] should treat the plaintext content.
pub enum PrepareMode<'a> {
    /// `PCF_NO_DECRYPTION` is set: page-pad only, no encryption.
    NoDecryption,
    /// Page-pad then AES-256-XTS encrypt with the given payload key.
    Encrypt(&'a [u8; xts::KEY_LEN]),
}

/// A tagged payload piece with a page-aligned guest-absolute load address
/// and a per-component XTS tweak.
#[derive(Debug)]
pub struct Component {
    pub ty: ComponentType,
    storage: Storage,
    pub orig_size: u64,
    pub src_addr: u64,
    pub tweak: [u8; 16],
    prepared: bool,
}

impl Component {
    /// Stats `path` (must be a regular file), caching its size. Allocates
    /// a fresh random tweak. Rejects an ELF `ComponentType::Kernel` image.
    pub fn new_file(ty: ComponentType, path: impl AsRef<Path>) -> Result<Self, crate::error::GenprotimgError> {
        let path = path.as_ref().to_path_buf();
        let meta = fs::metadata(&path).map_err(|source| IoError::Stat {
            path: path.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(IoError::NotRegularFile { path: path.clone() }.into());
        }
        let size = meta.len();
        if size > MAX_COMPONENT_SIZE {
            return Err(IoError::SizeTooLarge { path: path.clone(), size }.into());
        }

        if ty == ComponentType::Kernel {
            let mut magic = [0u8; 4];
            let mut file = File::open(&path).map_err(|source| IoError::Open {
                path: path.clone(),
                source,
            })?;
            let n = file.read(&mut magic).map_err(|source| IoError::Read {
                path: path.clone(),
                source,
            })?;
            if n == 4 && magic == ELF_MAGIC {
                return Err(ComponentError::ElfRejected.into());
            }
        }

        Ok(Self {
            ty,
            storage: Storage::File { path, size },
            orig_size: size,
            src_addr: 0,
            tweak: random::generate_tweak(ty)?,
            prepared: false,
        })
    }

    /// Copies `data` into an owned in-memory component.
    pub fn new_buf(ty: ComponentType, data: &[u8]) -> Result<Self, crate::error::GenprotimgError> {
        Ok(Self {
            ty,
            orig_size: data.len() as u64,
            storage: Storage::Buffer(Buffer::new(data.to_vec())),
            src_addr: 0,
            tweak: random::generate_tweak(ty)?,
            prepared: false,
        })
    }

    /// Current size of the backing storage: `orig_size` before
    /// [`Component::prepare`], a positive multiple of [`PAGE_SIZE`] after.
    pub fn size(&self) -> u64 {
        self.storage.len()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Page-pads (and, unless `mode` is [`PrepareMode::NoDecryption`],
    /// AES-256-XTS encrypts) the component's content, staging the result
    /// either back into an in-memory buffer or into
    /// `scratch/<type-name>` for file-backed components.
    pub fn prepare(
        &mut self,
        mode: &PrepareMode<'_>,
        scratch: &mut ScratchDir,
    ) -> Result<(), crate::error::GenprotimgError> {
        if self.prepared {
            return Ok(());
        }

        let plaintext = self.read_original()?;

        let prepared = match mode {
            PrepareMode::NoDecryption => Buffer::new(plaintext).page_padded().into_vec(),
            PrepareMode::Encrypt(key) => {
                let padded = Buffer::new(plaintext).page_padded();
                xts::encrypt_stream(key, &self.tweak, padded.as_slice())
                    .map_err(crate::error::GenprotimgError::Crypto)?
            }
        };

        match &self.storage {
            Storage::Buffer(_) => {
                self.storage = Storage::Buffer(Buffer::new(prepared));
            }
            Storage::File { .. } => {
                let dest = scratch.component_path(self.ty.name())?;
                let mut f = File::create(&dest).map_err(|source| IoError::Open {
                    path: dest.clone(),
                    source,
                })?;
                f.write_all(&prepared).map_err(|source| IoError::Write {
                    path: dest.clone(),
                    source,
                })?;
                self.storage = Storage::File {
                    size: prepared.len() as u64,
                    path: dest,
                };
            }
        }

        self.prepared = true;
        Ok(())
    }

    /// Reads the original (unprepared) plaintext, re-validating a
    /// file-backed component's size against what was cached at
    /// `new_file` time.
    fn read_original(&self) -> Result<Vec<u8>, crate::error::GenprotimgError> {
        match &self.storage {
            Storage::Buffer(b) => Ok(b.as_slice().to_vec()),
            Storage::File { path, size } => {
                let mut file = File::open(path).map_err(|source| IoError::Open {
                    path: path.clone(),
                    source,
                })?;
                let mut data = Vec::new();
                file.read_to_end(&mut data).map_err(|source| IoError::Read {
                    path: path.clone(),
                    source,
                })?;
                if data.len() as u64 != *size {
                    return Err(ComponentError::SizeChanged {
                        path: path.clone(),
                        expected: *size,
                        actual: data.len() as u64,
                    }
                    .into());
                }
                Ok(data)
            }
        }
    }

    /// Number of pages in the prepared storage. Must only be called after
    /// [`Component::prepare`].
    pub fn num_pages(&self) -> Result<usize, crate::error::GenprotimgError> {
        if !self.prepared {
            return Err(ComponentError::NotPrepared.into());
        }
        let size = self.storage.len() as usize;
        debug_assert_eq!(size % PAGE_SIZE, 0);
        Ok(size / PAGE_SIZE)
    }

    /// Returns the prepared bytes of page `idx` (each exactly
    /// [`PAGE_SIZE`] bytes).
    pub fn read_page(&self, idx: usize) -> Result<[u8; PAGE_SIZE], crate::error::GenprotimgError> {
        if !self.prepared {
            return Err(ComponentError::NotPrepared.into());
        }
        match &self.storage {
            Storage::Buffer(b) => {
                let mut page = [0u8; PAGE_SIZE];
                let start = idx * PAGE_SIZE;
                page.copy_from_slice(&b.as_slice()[start..start + PAGE_SIZE]);
                Ok(page)
            }
            Storage::File { path, .. } => {
                let mut file = File::open(path).map_err(|source| IoError::Open {
                    path: path.clone(),
                    source,
                })?;
                file.seek(SeekFrom::Start((idx * PAGE_SIZE) as u64))
                    .map_err(|source| IoError::Seek {
                        path: path.clone(),
                        source,
                    })?;
                let mut page = [0u8; PAGE_SIZE];
                file.read_exact(&mut page).map_err(|source| IoError::Read {
                    path: path.clone(),
                    source,
                })?;
                Ok(page)
            }
        }
    }

    /// Streams the prepared content verbatim to `out`, which the caller
    /// has already seeked to `src_addr`.
    pub fn stream_to(&self, out: &mut File) -> Result<(), crate::error::GenprotimgError> {
        if !self.prepared {
            return Err(ComponentError::NotPrepared.into());
        }
        match &self.storage {
            Storage::Buffer(b) => {
                out.write_all(b.as_slice())
                    .map_err(|source| IoError::Write {
                        path: PathBuf::from("<output>"),
                        source,
                    })?;
            }
            Storage::File { path, .. } => {
                let mut file = File::open(path).map_err(|source| IoError::Open {
                    path: path.clone(),
                    source,
                })?;
                std::io::copy(&mut file, out).map_err(|source| IoError::Write {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Internal test helper: forces prepared storage without going
    /// through [`Component::prepare`] (used to exercise digest/writer
    /// logic against known-shape data).
    #[cfg(test)]
    pub(crate) fn with_prepared_buffer(ty: ComponentType, data: Vec<u8>, tweak: [u8; 16]) -> Self {
        let orig_size = data.len() as u64;
        Self {
            ty,
            orig_size,
            storage: Storage::Buffer(Buffer::new(data)),
            src_addr: 0,
            tweak,
            prepared: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_no_decryption_pads_without_changing_bytes() {
        let mut scratch = ScratchDir::new();
        let mut comp = Component::new_buf(ComponentType::Cmdline, b"root=/dev/sda").unwrap();
        comp.prepare(&PrepareMode::NoDecryption, &mut scratch).unwrap();
        assert_eq!(comp.size() as usize, PAGE_SIZE);
        let page = comp.read_page(0).unwrap();
        assert_eq!(&page[..13], b"root=/dev/sda");
        assert!(page[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn prepare_encrypt_changes_bytes_and_pads() {
        let mut scratch = ScratchDir::new();
        let key = [0x5Au8; xts::KEY_LEN];
        let mut comp = Component::new_buf(ComponentType::Cmdline, b"hello").unwrap();
        comp.prepare(&PrepareMode::Encrypt(&key), &mut scratch).unwrap();
        assert_eq!(comp.size() as usize, PAGE_SIZE);
        let page = comp.read_page(0).unwrap();
        assert_ne!(&page[..5], b"hello");
    }

    #[test]
    fn empty_component_is_one_zero_page() {
        let mut scratch = ScratchDir::new();
        let mut comp = Component::new_buf(ComponentType::Initrd, &[]).unwrap();
        comp.prepare(&PrepareMode::NoDecryption, &mut scratch).unwrap();
        assert_eq!(comp.num_pages().unwrap(), 1);
    }

    #[test]
    fn type_rank_orders_kernel_before_stage3b() {
        assert!(ComponentType::Kernel < ComponentType::Cmdline);
        assert!(ComponentType::Cmdline < ComponentType::Initrd);
        assert!(ComponentType::Initrd < ComponentType::Stage3b);
    }
}
