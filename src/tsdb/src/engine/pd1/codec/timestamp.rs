//! Timestamps are stored as a delta chain: the first timestamp lives in the
//! block header, each subsequent one is encoded as the zigzag varint
//! difference from its predecessor. Sorted nanosecond timestamps produce
//! small positive deltas, so most entries take one or two bytes.

use crate::engine::pd1::codec::varint;
use crate::engine::pd1::codec::zigzag::{zig_zag_decode, zig_zag_encode};

/// encode_timestamps appends the delta chain for times[1..] to dst. The
/// first timestamp is carried in the block header and is not repeated here.
pub fn encode_timestamps(dst: &mut Vec<u8>, times: &[i64]) {
    for w in times.windows(2) {
        varint::write_uvarint(dst, zig_zag_encode(w[1].wrapping_sub(w[0])));
    }
}

/// decode_timestamps reads n-1 deltas from the front of buf, reconstructing
/// n timestamps starting at first. Returns the number of bytes consumed.
pub fn decode_timestamps(
    buf: &[u8],
    first: i64,
    n: usize,
    out: &mut Vec<i64>,
) -> anyhow::Result<usize> {
    if n == 0 {
        return Ok(0);
    }
    out.reserve(n);
    out.push(first);
    let mut prev = first;
    let mut off = 0usize;
    for _ in 1..n {
        let (v, sz) = varint::read_uvarint(&buf[off..])?;
        off += sz;
        prev = prev.wrapping_add(zig_zag_decode(v));
        out.push(prev);
    }
    Ok(off)
}
