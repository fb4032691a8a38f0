//! Output file serialisation: short-PSW, stage-3a, then each component at
//! its assigned `src_addr`.
//!
//! The output file is intentionally sparse: components are written with
//! `seek` rather than zero-filled between regions. Filesystems without
//! sparse-file support will simply materialise the holes as zero bytes,
//! which is also a correct (if larger) result.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::buffer::Buffer;
use crate::component::Component;
use crate::error::{GenprotimgError, IoError};

/// Bit 12, counted from the MSB (bit 0), of a 64-bit word — the
/// short-PSW marker bit.
const SHORT_PSW_MARKER_BIT: u64 = 1 << (63 - 12);
const SHORT_PSW_ADDR_BITS: u64 = 31;
const SHORT_PSW_ADDR_MASK: u64 = (1u64 << SHORT_PSW_ADDR_BITS) - 1;

/// Converts the stage-3a (mask, address) PSW into the 64-bit short form
/// written at file offset 0. Fails if the mask already carries the
/// short-PSW marker bit, or if the address does not fit in 31 bits.
pub fn short_psw(mask: u64, addr: u64) -> Result<u64, GenprotimgError> {
    if mask & SHORT_PSW_MARKER_BIT != 0 {
        return Err(crate::error::ImageError::Internal(
            "PSW mask already has the short-PSW marker bit (bit 12) set",
        )
        .into());
    }
    if addr > SHORT_PSW_ADDR_MASK {
        return Err(crate::error::ImageError::Internal(
            "PSW address does not fit in 31 bits for the short-PSW form",
        )
        .into());
    }

    let high = mask & !SHORT_PSW_ADDR_MASK;
    Ok(high | SHORT_PSW_MARKER_BIT | (addr & SHORT_PSW_ADDR_MASK))
}

/// Writes the final image: short PSW at offset 0, the (already patched)
/// stage-3a blob at `stage3a_load_address`, then every component at its
/// `src_addr`, in list order.
pub fn write_image(
    output_path: &Path,
    stage3a_load_address: u64,
    stage3a_blob: &Buffer,
    stage3a_psw_mask: u64,
    stage3a_psw_addr: u64,
    components: &[Component],
) -> Result<(), GenprotimgError> {
    let mut file = File::create(output_path).map_err(|source| IoError::Open {
        path: output_path.to_path_buf(),
        source,
    })?;

    let short = short_psw(stage3a_psw_mask, stage3a_psw_addr)?;
    file.write_all(&short.to_be_bytes())
        .map_err(|source| IoError::Write {
            path: output_path.to_path_buf(),
            source,
        })?;

    file.seek(SeekFrom::Start(stage3a_load_address))
        .map_err(|source| IoError::Seek {
            path: output_path.to_path_buf(),
            source,
        })?;
    file.write_all(stage3a_blob.as_slice())
        .map_err(|source| IoError::Write {
            path: output_path.to_path_buf(),
            source,
        })?;

    for comp in components {
        file.seek(SeekFrom::Start(comp.src_addr))
            .map_err(|source| IoError::Seek {
                path: output_path.to_path_buf(),
                source,
            })?;
        comp.stream_to(&mut file)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_psw_sets_marker_bit() {
        let psw = short_psw(0, 0x1000).unwrap();
        assert_eq!(psw & SHORT_PSW_MARKER_BIT, SHORT_PSW_MARKER_BIT);
        assert_eq!(psw & SHORT_PSW_ADDR_MASK, 0x1000);
    }

    #[test]
    fn short_psw_rejects_marker_bit_already_set() {
        assert!(short_psw(SHORT_PSW_MARKER_BIT, 0).is_err());
    }

    #[test]
    fn short_psw_rejects_address_over_31_bits() {
        assert!(short_psw(0, 1u64 << 31).is_err());
        assert!(short_psw(0, (1u64 << 31) - 1).is_ok());
    }

    #[test]
    fn write_image_places_components_at_their_addresses() {
        use crate::component::ComponentType;
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.img");

        let comp = Component::with_prepared_buffer(
            ComponentType::Kernel,
            vec![0x42; crate::buffer::PAGE_SIZE],
            [0u8; 16],
        );
        // src_addr defaults to 0 from with_prepared_buffer; bump it so we
        // can observe the seek actually landing at the right offset.
        let mut comp = comp;
        comp.src_addr = 2 * crate::buffer::PAGE_SIZE as u64;

        let blob = Buffer::new(vec![0xAB; 16]);
        write_image(&out_path, 4096, &blob, 0, 0x2000, &[comp]).unwrap();

        let mut file = File::open(&out_path).unwrap();
        let mut all = Vec::new();
        file.read_to_end(&mut all).unwrap();

        assert_eq!(&all[4096..4112], &[0xAB; 16]);
        assert_eq!(
            &all[2 * crate::buffer::PAGE_SIZE..2 * crate::buffer::PAGE_SIZE + crate::buffer::PAGE_SIZE],
            &[0x42; crate::buffer::PAGE_SIZE][..]
        );
    }
}
