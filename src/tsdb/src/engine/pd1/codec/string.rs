//! String values are concatenated as varint-length-prefixed byte strings and
//! the whole section is compressed with raw snappy.

use crate::engine::pd1::codec::varint;

/// encode_strings appends the snappy-compressed section for values to dst.
pub fn encode_strings<'a>(
    dst: &mut Vec<u8>,
    values: impl Iterator<Item = &'a [u8]>,
) -> anyhow::Result<()> {
    let mut plain = Vec::new();
    for v in values {
        varint::write_uvarint(&mut plain, v.len() as u64);
        plain.extend_from_slice(v);
    }

    let compressed = snap::raw::Encoder::new()
        .compress_vec(&plain)
        .map_err(|e| anyhow!("snappy compress: {}", e))?;
    dst.extend_from_slice(&compressed);
    Ok(())
}

/// decode_strings decompresses buf and reads n values from it.
pub fn decode_strings(buf: &[u8], n: usize) -> anyhow::Result<Vec<Vec<u8>>> {
    let plain = snap::raw::Decoder::new()
        .decompress_vec(buf)
        .map_err(|e| anyhow!("snappy decompress: {}", e))?;

    let mut out = Vec::with_capacity(n);
    let mut off = 0usize;
    for _ in 0..n {
        let (len, sz) = varint::read_uvarint(&plain[off..])?;
        off += sz;
        let end = off + len as usize;
        if end > plain.len() {
            bail!("string block truncated: value of {} bytes at offset {}", len, off);
        }
        out.push(plain[off..end].to_vec());
        off = end;
    }
    Ok(out)
}
