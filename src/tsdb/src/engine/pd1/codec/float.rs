//! Float values are stored as raw big-endian IEEE-754 bits, 8 bytes each.

use bytes::BufMut;

/// encode_floats appends each value's raw bits to dst.
pub fn encode_floats(dst: &mut Vec<u8>, values: impl Iterator<Item = f64>) {
    for v in values {
        dst.put_f64(v);
    }
}

/// decode_floats reads n values from buf.
pub fn decode_floats(buf: &[u8], n: usize) -> anyhow::Result<Vec<f64>> {
    if buf.len() < n * 8 {
        bail!("float block truncated: {} bytes for {} values", buf.len(), n);
    }
    Ok(buf
        .chunks_exact(8)
        .take(n)
        .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}
