//! Block encoding. A block packs one series' run of values as: the first
//! timestamp raw (8 bytes big-endian, readable without decoding the rest), a
//! type byte, a varint value count, the timestamp delta chain, then the
//! type-specific payload section.

use bytes::BufMut;

use crate::engine::pd1::codec::{
    boolean, float, integer, string, timestamp, unsigned, varint, BLOCK_BOOLEAN, BLOCK_FLOAT64,
    BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
};
use crate::engine::pd1::value::{FieldType, TimeValue, TypeValues, Values};

/// Size of the uncompressed first-timestamp prefix.
const FIRST_TIME_SIZE: usize = 8;

fn times_of<T>(values: &TypeValues<T>) -> Vec<i64>
where
    T: FieldType,
{
    values.iter().map(|v| v.unix_nano).collect()
}

/// encode_block appends the encoded form of values to dst. Values must not
/// be empty and must be sorted ascending by time.
pub fn encode_block(dst: &mut Vec<u8>, values: &Values) -> anyhow::Result<()> {
    if values.is_empty() {
        bail!("encode_block: no data found");
    }

    dst.put_i64(values.time_at(0));
    dst.put_u8(values.block_type());
    varint::write_uvarint(dst, values.len() as u64);

    match values {
        Values::Float(v) => {
            timestamp::encode_timestamps(dst, &times_of(v));
            float::encode_floats(dst, v.iter().map(|x| x.value));
        }
        Values::Integer(v) => {
            timestamp::encode_timestamps(dst, &times_of(v));
            integer::encode_integers(dst, v.iter().map(|x| x.value));
        }
        Values::Bool(v) => {
            timestamp::encode_timestamps(dst, &times_of(v));
            boolean::encode_booleans(dst, v.iter().map(|x| x.value));
        }
        Values::Str(v) => {
            timestamp::encode_timestamps(dst, &times_of(v));
            string::encode_strings(dst, v.iter().map(|x| x.value.as_slice()))?;
        }
        Values::Unsigned(v) => {
            timestamp::encode_timestamps(dst, &times_of(v));
            unsigned::encode_unsigned(dst, v.iter().map(|x| x.value));
        }
    }
    Ok(())
}

fn zip<T>(times: Vec<i64>, values: Vec<T>) -> TypeValues<T>
where
    T: FieldType,
{
    times
        .into_iter()
        .zip(values)
        .map(|(t, v)| TimeValue::new(t, v))
        .collect()
}

/// decode_block restores the Values encoded in block.
pub fn decode_block(block: &[u8]) -> anyhow::Result<Values> {
    if block.len() < FIRST_TIME_SIZE + 1 {
        bail!("decode_block: block of {} bytes too short", block.len());
    }

    let first = i64::from_be_bytes([
        block[0], block[1], block[2], block[3], block[4], block[5], block[6], block[7],
    ]);
    let typ = block[FIRST_TIME_SIZE];

    let (n, sz) = varint::read_uvarint(&block[FIRST_TIME_SIZE + 1..])?;
    let n = n as usize;
    let mut off = FIRST_TIME_SIZE + 1 + sz;

    let mut times = Vec::new();
    off += timestamp::decode_timestamps(&block[off..], first, n, &mut times)?;

    match typ {
        BLOCK_FLOAT64 => Ok(Values::Float(zip(times, float::decode_floats(&block[off..], n)?))),
        BLOCK_INTEGER => Ok(Values::Integer(zip(
            times,
            integer::decode_integers(&block[off..], n)?,
        ))),
        BLOCK_BOOLEAN => Ok(Values::Bool(zip(
            times,
            boolean::decode_booleans(&block[off..], n)?,
        ))),
        BLOCK_STRING => Ok(Values::Str(zip(
            times,
            string::decode_strings(&block[off..], n)?,
        ))),
        BLOCK_UNSIGNED => Ok(Values::Unsigned(zip(
            times,
            unsigned::decode_unsigned(&block[off..], n)?,
        ))),
        _ => bail!("decode_block: unknown block type {}", typ),
    }
}

impl Values {
    /// decode_same_type_block decodes block and verifies the payload type
    /// matches the receiver's.
    pub fn decode_same_type_block(&self, block: &[u8]) -> anyhow::Result<Values> {
        let decoded = decode_block(block)?;
        if decoded.block_type() != self.block_type() {
            bail!(
                "block type {} does not match series type {}",
                decoded.block_type(),
                self.block_type()
            );
        }
        Ok(decoded)
    }
}
