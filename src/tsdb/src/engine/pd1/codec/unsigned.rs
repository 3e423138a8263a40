//! Unsigned values reuse the integer delta chain, bit-cast through i64.

use crate::engine::pd1::codec::integer;

/// encode_unsigned appends the delta chain for values to dst.
pub fn encode_unsigned(dst: &mut Vec<u8>, values: impl Iterator<Item = u64>) {
    integer::encode_integers(dst, values.map(|v| v as i64));
}

/// decode_unsigned reads n values from the front of buf.
pub fn decode_unsigned(buf: &[u8], n: usize) -> anyhow::Result<Vec<u64>> {
    Ok(integer::decode_integers(buf, n)?
        .into_iter()
        .map(|v| v as u64)
        .collect())
}

#[cfg(test)]
mod tests {
    use crate::engine::pd1::codec::unsigned::{decode_unsigned, encode_unsigned};

    #[test]
    fn test_unsigned_round_trip() {
        let values = [0u64, 1, u64::MAX, u64::MAX / 2, 1000];
        let mut buf = Vec::new();
        encode_unsigned(&mut buf, values.iter().copied());
        assert_eq!(decode_unsigned(&buf, values.len()).unwrap(), values);
    }
}
