//! IPL Parameter Information Block (IPIB) construction and stage-3a
//! patching.
//!
//! The stage-3a template is an opaque blob (the boot-loader binary
//! itself is out of scope here) that, at runtime,
//! copies the IPIB and PV header to fixed addresses and invokes the
//! Secure Execution "unpack" instruction. The only thing this crate needs
//! to know about its internal layout is where to patch in the IPIB and
//! PV header offsets; the template carries that as an 8-byte big-endian
//! offset at each of two fixed slots at its very start.

use crate::component::Component;
use crate::endian::{put_u16_be, put_u64_be};
use crate::error::{GenprotimgError, ImageError};

/// Offset, within the stage-3a template, of the big-endian `u64` giving
/// where (relative to the template's start) the IPIB should be written.
const IPIB_OFFSET_SLOT: usize = 0x00;
/// Offset of the big-endian `u64` giving where the PV header should be
/// written.
const PV_HEADER_OFFSET_SLOT: usize = 0x08;

/// One IPIB component entry: guest-absolute address, size, and type.
pub struct IpibEntry {
    pub src_addr: u64,
    pub size: u64,
    pub comp_type: u16,
}

/// Exact serialised size of [`build_ipib`]'s output for `component_count`
/// components: `magic(4) + count(8) + component_count * 24-byte entries +
/// trailer(16)`. Lets callers reserve guest address space for the IPIB
/// before the final component list exists.
pub const fn ipib_byte_len(component_count: usize) -> usize {
    4 + 8 + component_count * 24 + 16
}

/// Offsets, relative to the template's start, of the two patch points this
/// template advertises. Exposed so callers can size the stage-3a region
/// before patching.
pub fn read_template_offsets(template: &[u8]) -> Result<(u64, u64), GenprotimgError> {
    read_patch_offsets(template)
}

/// Serialises the IPL Parameter Information Block: a component table
/// (`src_addr`, `size`, type marker) for every component, plus a trailer
/// giving where the PV header itself lives.
pub fn build_ipib(components: &[Component], pv_header_addr: u64, pv_header_size: u64) -> Vec<u8> {
    let mut ipib = Vec::new();
    ipib.extend_from_slice(b"IPIB");
    put_u64_be(&mut ipib, components.len() as u64);

    for comp in components {
        put_u64_be(&mut ipib, comp.src_addr);
        put_u64_be(&mut ipib, comp.size());
        put_u16_be(&mut ipib, comp.ty as u16);
        ipib.extend_from_slice(&[0u8; 6]); // pad entry to a round 24 bytes
    }

    put_u64_be(&mut ipib, pv_header_addr);
    put_u64_be(&mut ipib, pv_header_size);
    ipib
}

/// Reads the two patch-point offsets out of the template header.
fn read_patch_offsets(template: &[u8]) -> Result<(u64, u64), GenprotimgError> {
    if template.len() < PV_HEADER_OFFSET_SLOT + 8 {
        return Err(ImageError::Internal("stage-3a template too small to carry patch offsets").into());
    }
    let ipib_off = crate::endian::get_u64_be(template, IPIB_OFFSET_SLOT);
    let hdr_off = crate::endian::get_u64_be(template, PV_HEADER_OFFSET_SLOT);
    Ok((ipib_off, hdr_off))
}

/// Patches a copy of `template` with the serialised `ipib` and `pv_header`
/// bytes at the offsets the template itself advertises, growing the
/// buffer as needed. Returns the patched blob.
pub fn patch(
    template: &[u8],
    ipib: &[u8],
    pv_header: &[u8],
) -> Result<crate::buffer::Buffer, GenprotimgError> {
    let (ipib_off, hdr_off) = read_patch_offsets(template)?;

    let mut blob = crate::buffer::Buffer::new(template.to_vec());
    blob.patch_at(ipib_off as usize, ipib);
    blob.patch_at(hdr_off as usize, pv_header);
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentType;

    fn fake_template() -> Vec<u8> {
        let mut t = vec![0u8; 64];
        put_u64_be_at(&mut t, IPIB_OFFSET_SLOT, 64);
        put_u64_be_at(&mut t, PV_HEADER_OFFSET_SLOT, 4096);
        t
    }

    fn put_u64_be_at(buf: &mut [u8], offset: usize, v: u64) {
        buf[offset..offset + 8].copy_from_slice(&v.to_be_bytes());
    }

    #[test]
    fn build_ipib_includes_trailer() {
        let comp = Component::with_prepared_buffer(ComponentType::Kernel, vec![0u8; 4096], [0u8; 16]);
        let ipib = build_ipib(std::slice::from_ref(&comp), 0x2000, 256);
        assert_eq!(&ipib[0..4], b"IPIB");
        let trailer_start = ipib.len() - 16;
        assert_eq!(
            u64::from_be_bytes(ipib[trailer_start..trailer_start + 8].try_into().unwrap()),
            0x2000
        );
    }

    #[test]
    fn ipib_byte_len_matches_build_ipib_output() {
        let comps: Vec<Component> = (0..3)
            .map(|_| Component::with_prepared_buffer(ComponentType::Kernel, vec![0u8; 4096], [0u8; 16]))
            .collect();
        let ipib = build_ipib(&comps, 0x2000, 256);
        assert_eq!(ipib.len(), ipib_byte_len(comps.len()));
    }

    #[test]
    fn patch_writes_at_advertised_offsets() {
        let template = fake_template();
        let ipib = vec![0xAAu8; 10];
        let header = vec![0xBBu8; 20];
        let blob = patch(&template, &ipib, &header).unwrap();
        assert_eq!(&blob.as_slice()[64..74], ipib.as_slice());
        assert_eq!(&blob.as_slice()[4096..4116], header.as_slice());
    }
}
