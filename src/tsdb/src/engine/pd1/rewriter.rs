use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::engine::pd1::block::encode_block;
use crate::engine::pd1::data_file::{self, DataFile};
use crate::engine::pd1::engine::Engine;
use crate::engine::pd1::value::Values;
use crate::engine::pd1::{BLOCK_HEADER_SIZE, FILE_HEADER_SIZE};

/// write_block appends one `{id, len, bytes}` block record to the file.
pub(crate) async fn write_block(
    f: &mut tokio::fs::File,
    id: u64,
    block: &[u8],
) -> anyhow::Result<()> {
    let mut header = [0u8; BLOCK_HEADER_SIZE as usize];
    header[..8].copy_from_slice(&id.to_be_bytes());
    header[8..].copy_from_slice(&(block.len() as u32).to_be_bytes());
    f.write_all(&header).await?;
    f.write_all(block).await?;
    Ok(())
}

/// write_chunked_blocks encodes values as one or more blocks of at most
/// max_points values each and appends them to the file.
pub(crate) async fn write_chunked_blocks(
    f: &mut tokio::fs::File,
    id: u64,
    mut values: Values,
    buf: &mut Vec<u8>,
    current_position: &mut u32,
    max_points: usize,
) -> anyhow::Result<()> {
    while !values.is_empty() {
        let rest = if values.len() > max_points {
            values.split_off(max_points)
        } else {
            values.same_type_empty()
        };
        buf.clear();
        encode_block(buf, &values)?;
        write_block(f, id, buf).await?;
        *current_position += BLOCK_HEADER_SIZE + buf.len() as u32;
        values = rest;
    }
    Ok(())
}

/// decode_and_combine folds pending new_values into the decoded old block,
/// encoding one output block into buf and returning the values still left
/// to write. When the old file holds a later block for this id
/// (has_future_block), only the new values before next_time are folded in;
/// the rest stay pending so they land in their time-ordered block.
/// Duplicate timestamps keep the newer value.
pub(crate) fn decode_and_combine(
    new_values: Values,
    block: &[u8],
    buf: &mut Vec<u8>,
    next_time: i64,
    has_future_block: bool,
    max_points_per_block: usize,
) -> anyhow::Result<Values> {
    let mut values = new_values.decode_same_type_block(block)?;

    let mut remaining;
    if has_future_block {
        let mut prefix = new_values;
        let pos = prefix.search(next_time);
        remaining = prefix.split_off(pos);
        values.append(prefix)?;
        values.deduplicate();
    } else {
        // when the new values all land after the block there is nothing to
        // re-sort
        let require_sort = !new_values.is_empty() && values.max_time() >= new_values.min_time();
        values.append(new_values)?;
        if require_sort {
            values.deduplicate();
        }
        remaining = values.same_type_empty();
    }

    if values.len() > max_points_per_block {
        let mut rest = values.split_off(max_points_per_block);
        rest.append(remaining)?;
        remaining = rest;
    }

    buf.clear();
    encode_block(buf, &values)?;
    Ok(remaining)
}

impl Engine {
    /// rewrite_file folds values_by_id into old_df (when given), sealing a
    /// new data file and atomically swapping it into the file set. The
    /// caller must hold the range lock covering the union of the old file's
    /// range and the values' range. The replaced file is deleted in the
    /// background once running queries drain.
    pub(crate) async fn rewrite_file(
        &self,
        old_df: Option<Arc<DataFile>>,
        mut values_by_id: HashMap<u64, Values>,
    ) -> anyhow::Result<()> {
        if values_by_id.is_empty() {
            return Ok(());
        }

        let mut ids: Vec<u64> = values_by_id.keys().copied().collect();

        let mut min_time = i64::MAX;
        let mut max_time = i64::MIN;
        let old_id_to_position = match &old_df {
            Some(df) => {
                min_time = df.min_time();
                max_time = df.max_time();
                df.id_to_position()
            }
            None => HashMap::new(),
        };
        for v in values_by_id.values() {
            min_time = min_time.min(v.min_time());
            // stored max times are exclusive
            max_time = max_time.max(v.max_time() + 1);
        }

        // ids that live in the old file but aren't part of this flush still
        // carry over
        for id in old_id_to_position.keys() {
            if !values_by_id.contains_key(id) {
                ids.push(*id);
            }
        }
        ids.sort_unstable();

        let (mut f, path) = self.create_data_file().await?;

        let max_points = self.options.max_points_per_block;
        let mut current_position = FILE_HEADER_SIZE;
        let mut new_positions = Vec::with_capacity(ids.len());
        let mut buf = Vec::new();
        for id in &ids {
            new_positions.push(current_position);

            let Some(mut new_vals) = values_by_id.remove(id) else {
                // untouched id: copy its blocks verbatim out of the mmap
                let df = old_df.as_ref().expect("untouched id comes from the old file");
                let mut fpos = old_id_to_position[id];
                while let Some((fid, _, block)) = df.block(fpos) {
                    if fid != *id {
                        break;
                    }
                    let end = fpos + BLOCK_HEADER_SIZE + block.len() as u32;
                    f.write_all(df.raw(fpos, end)).await?;
                    current_position += end - fpos;
                    fpos = end;
                }
                continue;
            };

            let Some(start) = old_id_to_position.get(id).copied() else {
                // id only exists in the incoming values
                write_chunked_blocks(&mut f, *id, new_vals, &mut buf, &mut current_position, max_points)
                    .await?;
                continue;
            };

            // the id is in both: walk the old blocks, folding new values in
            let df = old_df.as_ref().expect("merged id comes from the old file");
            let mut fpos = start;
            loop {
                let Some((fid, _, block)) = df.block(fpos) else { break };
                if fid != *id {
                    break;
                }
                fpos += BLOCK_HEADER_SIZE + block.len() as u32;

                let (next_time, has_future_block) = match df.block(fpos) {
                    Some((nid, nt, _)) if nid == *id => (nt, true),
                    _ => (0, false),
                };

                new_vals = decode_and_combine(
                    new_vals,
                    block,
                    &mut buf,
                    next_time,
                    has_future_block,
                    max_points,
                )?;
                write_block(&mut f, *id, &buf).await?;
                current_position += BLOCK_HEADER_SIZE + buf.len() as u32;
            }

            if !new_vals.is_empty() {
                write_chunked_blocks(&mut f, *id, new_vals, &mut buf, &mut current_position, max_points)
                    .await?;
            }
        }

        let new_df = self
            .write_index_and_open(f, &path, min_time, max_time, &ids, &new_positions)
            .await?;

        // swap the replaced file for the new one, keeping the set sorted
        {
            let mut state = self.state.write().await;
            if let Some(old) = &old_df {
                state.files.retain(|df| !Arc::ptr_eq(df, old));
            }
            state.files.push(new_df);
            data_file::sort_data_files(&mut state.files);
        }

        if let Some(old) = old_df {
            self.schedule_delete(vec![old]);
        }
        Ok(())
    }
}
