//! Ordered, digest-accumulating list of [`Component`]s.

use crate::buffer::PAGE_SIZE;
use crate::component::Component;
use crate::crypto::digest::Sha512Builder;
use crate::endian::{put_u64_be, tweak_add};
use crate::error::{GenprotimgError, ImageError};

/// Result of [`ComponentList::finalize`]: the three payload digests plus
/// the total number of encrypted pages they cover.
pub struct Digests {
    pub pld: [u8; 64],
    pub ald: [u8; 64],
    pub tld: [u8; 64],
    pub nep: u64,
}

/// Ordered sequence of components, sorted by [`crate::component::ComponentType`]
/// rank by construction (callers add them in rank order, finishing with
/// `Stage3b`), plus the running address allocator and the three
/// incremental SHA-512 digest states.
pub struct ComponentList {
    components: Vec<Component>,
    next_src: u64,
    pld: Sha512Builder,
    ald: Sha512Builder,
    tld: Sha512Builder,
    nep: u64,
    finalized: bool,
    digests: Option<Digests>,
}

impl ComponentList {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            next_src: 0,
            pld: Sha512Builder::new(),
            ald: Sha512Builder::new(),
            tld: Sha512Builder::new(),
            nep: 0,
            finalized: false,
            digests: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn nep(&self) -> u64 {
        self.nep
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Reserves `off` bytes at the front of the address space, e.g. for
    /// the stage-3a region. May only be called while the list is empty;
    /// `off` must be page-aligned.
    pub fn set_offset(&mut self, off: u64) -> Result<(), GenprotimgError> {
        if !self.components.is_empty() {
            return Err(ImageError::OffsetAfterAdd.into());
        }
        debug_assert_eq!(off % PAGE_SIZE as u64, 0, "offset must be page-aligned");
        self.next_src += off;
        Ok(())
    }

    /// Appends an already-[`Component::prepare`]d component, assigning
    /// its `src_addr` and bumping the allocator by
    /// `max(size(comp), PAGE_SIZE)`.
    pub fn add(&mut self, mut comp: Component) -> Result<(), GenprotimgError> {
        if self.finalized {
            return Err(ImageError::Finalized.into());
        }
        comp.src_addr = self.next_src;
        let advance = comp.size().max(PAGE_SIZE as u64);
        self.next_src += advance;
        self.components.push(comp);
        Ok(())
    }

    pub fn next_src(&self) -> u64 {
        self.next_src
    }

    /// Computes pld/ald/tld over every component in list order and marks
    /// the list finalized. No further component may be added afterwards.
    pub fn finalize(&mut self) -> Result<(), GenprotimgError> {
        if self.finalized {
            return Err(ImageError::Finalized.into());
        }

        for comp in &self.components {
            let pages = comp
                .num_pages()
                .map_err(|_| ImageError::Internal("component not prepared before finalize"))?;
            debug_assert!(pages > 0, "a prepared component always has at least one page");

            for page_idx in 0..pages {
                let page = comp.read_page(page_idx)?;
                self.pld.update(&page);

                let mut addr_buf = Vec::with_capacity(8);
                put_u64_be(
                    &mut addr_buf,
                    comp.src_addr + (page_idx as u64) * PAGE_SIZE as u64,
                );
                self.ald.update(&addr_buf);

                let tweak = tweak_add(&comp.tweak, (page_idx as u128) * PAGE_SIZE as u128);
                self.tld.update(&tweak);

                self.nep += 1;
            }
        }

        self.digests = Some(Digests {
            pld: self.pld.clone().finalize(),
            ald: self.ald.clone().finalize(),
            tld: self.tld.clone().finalize(),
            nep: self.nep,
        });
        self.finalized = true;
        Ok(())
    }

    /// Returns the computed digests. Only meaningful after
    /// [`ComponentList::finalize`].
    pub fn digests(&self) -> Option<&Digests> {
        self.digests.as_ref()
    }
}

impl Default for ComponentList {
    fn default() -> Self {
        Self::new()
    }
}
