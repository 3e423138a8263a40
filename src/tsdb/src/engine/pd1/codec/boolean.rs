//! Boolean values are bit-packed, eight per byte, most significant bit
//! first.

/// encode_booleans appends the packed bits for values to dst.
pub fn encode_booleans(dst: &mut Vec<u8>, values: impl Iterator<Item = bool>) {
    let mut byte = 0u8;
    let mut nbits = 0u32;
    for v in values {
        if v {
            byte |= 0x80 >> nbits;
        }
        nbits += 1;
        if nbits == 8 {
            dst.push(byte);
            byte = 0;
            nbits = 0;
        }
    }
    if nbits > 0 {
        dst.push(byte);
    }
}

/// decode_booleans reads n values from buf.
pub fn decode_booleans(buf: &[u8], n: usize) -> anyhow::Result<Vec<bool>> {
    if buf.len() * 8 < n {
        bail!("boolean block truncated: {} bytes for {} values", buf.len(), n);
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(buf[i / 8] & (0x80 >> (i % 8)) != 0);
    }
    Ok(out)
}
