//! Integer values are stored as a zigzag varint delta chain: the first value
//! zigzag encoded directly, each subsequent one as the zigzag of its
//! difference from the predecessor.

use crate::engine::pd1::codec::varint;
use crate::engine::pd1::codec::zigzag::{zig_zag_decode, zig_zag_encode};

/// encode_integers appends the delta chain for values to dst.
pub fn encode_integers(dst: &mut Vec<u8>, values: impl Iterator<Item = i64>) {
    let mut prev = 0i64;
    for v in values {
        varint::write_uvarint(dst, zig_zag_encode(v.wrapping_sub(prev)));
        prev = v;
    }
}

/// decode_integers reads n values from the front of buf.
pub fn decode_integers(buf: &[u8], n: usize) -> anyhow::Result<Vec<i64>> {
    let mut out = Vec::with_capacity(n);
    let mut prev = 0i64;
    let mut off = 0usize;
    for _ in 0..n {
        let (v, sz) = varint::read_uvarint(&buf[off..])?;
        off += sz;
        prev = prev.wrapping_add(zig_zag_decode(v));
        out.push(prev);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::engine::pd1::codec::integer::{decode_integers, encode_integers};

    #[test]
    fn test_integers_round_trip() {
        let values = [0i64, -5, 5, i64::MIN, i64::MAX, 42];
        let mut buf = Vec::new();
        encode_integers(&mut buf, values.iter().copied());
        assert_eq!(decode_integers(&buf, values.len()).unwrap(), values);
    }
}
