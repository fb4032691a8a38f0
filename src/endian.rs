//! Big-endian serialisation helpers.
//!
//! Every on-disk integer in the PV image format is big-endian. These
//! helpers keep that discipline in one place instead of scattering
//! `to_be_bytes()`/`from_be_bytes()` calls through the serialisation code.

/// Appends a big-endian `u16` to `out`.
pub fn put_u16_be(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `u32` to `out`.
pub fn put_u32_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `u64` to `out`.
pub fn put_u64_be(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Reads a big-endian `u64` out of `data[offset..offset + 8]`.
///
/// Panics if `data` is too short; callers only use this on buffers whose
/// length was already validated against the fixed header layout.
pub fn get_u64_be(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

/// Treats `tweak` as a 128-bit big-endian unsigned integer and returns
/// `tweak + addend`, wrapping on overflow (unreachable for realistic image
/// sizes, but defined rather than panicking).
pub fn tweak_add(tweak: &[u8; 16], addend: u128) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(tweak);
    let value = u128::from_be_bytes(buf);
    (value.wrapping_add(addend)).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_u64() {
        let mut buf = Vec::new();
        put_u64_be(&mut buf, 0x0102030405060708);
        assert_eq!(get_u64_be(&buf, 0), 0x0102030405060708);
    }

    #[test]
    fn tweak_add_increments_counter() {
        let tweak = [
            0x00, 0x00, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        let next = tweak_add(&tweak, 4096);
        assert_eq!(&next[0..8], &tweak[0..8]);
        assert_eq!(u64::from_be_bytes(next[8..16].try_into().unwrap()), 4096);
    }
}
