use byteorder::{ByteOrder, LE};

/// Single control instruction of a patch.
///
/// `add` bytes are produced by summing source bytes with the diff stream,
/// `copy` bytes are taken verbatim from the extra stream, then the source
/// cursor moves by `seek`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Control {
    pub add: u64,
    pub copy: u64,
    pub seek: i64,
}

/// Decodes a sign-magnitude integer (low 63 bits magnitude, high bit sign).
#[inline]
pub fn decode_int(b: &[u8]) -> i64 {
    let x = LE::read_u64(b);
    if x >> 63 == 0 || x == 0x8000000000000000 {
        x as i64
    } else {
        ((x & 0x7fffffffffffffff) as i64).wrapping_neg()
    }
}

/// Encodes a sign-magnitude integer.
#[inline]
pub fn encode_int(x: i64, b: &mut [u8]) {
    if x < 0 {
        LE::write_u64(b, x.wrapping_neg() as u64 | 0x8000000000000000);
    } else {
        LE::write_u64(b, x as u64);
    }
}
