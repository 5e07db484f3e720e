#![forbid(unsafe_code)]
//! Header field accessors and order-preserving key encoders.

pub mod le {
    //! Little-endian fixed-width fields inside on-disk headers.

    /// Reads a `u32` at `at`.
    pub fn get_u32(src: &[u8], at: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&src[at..at + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Writes a `u32` at `at`.
    pub fn put_u32(dst: &mut [u8], at: usize, v: u32) {
        dst[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
}

pub mod ord {
    //! Order-preserving encoders: byte-wise comparison of encodings matches
    //! the natural order of the encoded values.

    const SIGN_BIT: u64 = 1 << 63;

    /// Appends a big-endian u64.
    pub fn put_u64_be(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends an i64 with the sign bit flipped so negatives sort first.
    pub fn put_i64_be(dst: &mut Vec<u8>, v: i64) {
        put_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Appends an f64 in total order (NaN not allowed).
    pub fn put_f64_be(dst: &mut Vec<u8>, v: f64) {
        debug_assert!(!v.is_nan(), "NaN keys are not allowed");
        let bits = v.to_bits();
        let encoded = if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT
        };
        put_u64_be(dst, encoded);
    }

    /// Appends a string so that shorter prefixes sort first.
    ///
    /// Zero bytes are escaped as `00 FF` and the string ends with `00 00`,
    /// which keeps composite keys comparable field by field.
    pub fn put_str_key(dst: &mut Vec<u8>, s: &str) {
        for &b in s.as_bytes() {
            dst.push(b);
            if b == 0 {
                dst.push(0xFF);
            }
        }
        dst.extend_from_slice(&[0, 0]);
    }
}
