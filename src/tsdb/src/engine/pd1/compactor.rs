use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::engine::pd1::block::{decode_block, encode_block};
use crate::engine::pd1::data_file::{self, DataFile};
use crate::engine::pd1::engine::{file_age, same_files, Engine};
use crate::engine::pd1::rewriter::{write_block, write_chunked_blocks};
use crate::engine::pd1::value::Values;
use crate::engine::pd1::{BLOCK_HEADER_SIZE, FILE_HEADER_SIZE};

/// FileCursor walks one input file during a compaction merge: the position
/// of the next unread block and the series id found there. The id goes to
/// None once the cursor reaches the index region.
struct FileCursor {
    pos: u32,
    id: Option<u64>,
}

impl Engine {
    /// files_to_compact selects the contiguous prefix of files old enough
    /// and small enough to fold together. Selection stops at the first file
    /// that fails either test so active files never merge with cold ones.
    pub(crate) async fn files_to_compact(&self) -> Vec<Arc<DataFile>> {
        let state = self.state.read().await;
        let mut a = Vec::new();
        for df in &state.files {
            if file_age(df) > self.options.compaction_age
                && df.size() < self.options.max_data_file_size
            {
                a.push(df.clone());
            } else {
                break;
            }
        }
        a
    }

    /// should_compact reports whether an automatic compaction is due.
    pub(crate) async fn should_compact(&self) -> bool {
        {
            let state = self.state.read().await;
            if state.compaction_running {
                return false;
            }
            if let Some(last) = state.last_compaction_time {
                if last.elapsed() < self.options.index_minimum_compaction_interval {
                    return false;
                }
            }
        }
        self.files_to_compact().await.len() >= self.options.compaction_file_count
    }

    /// compact folds the candidate files (the whole set when full) into one
    /// new data file with a block-wise multi-way merge, then swaps it in and
    /// deletes the consumed files in the background.
    pub async fn compact(&self, full: bool) -> anyhow::Result<()> {
        // the candidates can change while we wait on the range lock; take
        // the lock, re-read, and retry until the snapshot holds
        let (files, min_time, max_time) = loop {
            let files = if full {
                self.copy_files().await
            } else {
                self.files_to_compact().await
            };
            if files.len() < 2 {
                return Ok(());
            }
            let min_time = files[0].min_time();
            let max_time = files[files.len() - 1].max_time();

            self.write_lock.lock(min_time, max_time).await;

            let after = if full {
                self.copy_files().await
            } else {
                self.files_to_compact().await
            };
            if same_files(&files, &after) {
                break (files, min_time, max_time);
            }
            self.write_lock.unlock(min_time, max_time);
        };

        info!(files = files.len(), "starting compaction");
        let start = Instant::now();
        self.state.write().await.compaction_running = true;

        let result = self.compact_files(&files, min_time, max_time).await;

        self.write_lock.unlock(min_time, max_time);
        {
            let mut state = self.state.write().await;
            state.compaction_running = false;
            state.last_compaction_time = Some(Instant::now());
        }

        if result.is_ok() {
            info!(elapsed_ms = start.elapsed().as_millis() as u64, "compaction finished");
        }
        result
    }

    async fn compact_files(
        &self,
        files: &[Arc<DataFile>],
        min_time: i64,
        max_time: i64,
    ) -> anyhow::Result<()> {
        let (mut f, path) = self.create_data_file().await?;

        let mut cursors: Vec<FileCursor> = files
            .iter()
            .map(|df| FileCursor {
                pos: FILE_HEADER_SIZE,
                id: df.block(FILE_HEADER_SIZE).map(|(id, _, _)| id),
            })
            .collect();

        let max_points = self.options.max_points_per_block;
        let rotate_block_size = self.options.rotate_block_size;

        let mut current_position = FILE_HEADER_SIZE;
        let mut new_ids = Vec::new();
        let mut new_positions = Vec::new();
        let mut buf = Vec::new();

        // merge by ascending id; ties resolve to the lowest file index so
        // older values stay in front
        while let Some(min_id) = cursors.iter().filter_map(|c| c.id).min() {
            new_ids.push(min_id);
            new_positions.push(current_position);

            // undersized blocks coalesce across files through this carry
            let mut carry: Option<Values> = None;
            for (i, df) in files.iter().enumerate() {
                if cursors[i].id != Some(min_id) {
                    continue;
                }
                loop {
                    let Some((fid, _, block)) = df.block(cursors[i].pos) else {
                        // this cursor drained into the index region
                        cursors[i].id = None;
                        break;
                    };
                    if fid != min_id {
                        cursors[i].id = Some(fid);
                        break;
                    }
                    // the block length always comes from this block's own
                    // header
                    let block_end = cursors[i].pos + BLOCK_HEADER_SIZE + block.len() as u32;

                    if let Some(prev) = carry.as_mut() {
                        let decoded = prev.decode_same_type_block(block)?;
                        prev.append(decoded)?;
                    } else if block.len() as u32 > rotate_block_size {
                        // already full-size: copy it verbatim
                        f.write_all(df.raw(cursors[i].pos, block_end)).await?;
                        current_position += block_end - cursors[i].pos;
                    } else {
                        carry = Some(decode_block(block)?);
                    }
                    cursors[i].pos = block_end;

                    // flush complete blocks out of the carry
                    if let Some(prev) = carry.as_mut() {
                        if !prev.ordered() {
                            prev.deduplicate();
                        }
                        while prev.len() >= max_points {
                            let rest = prev.split_off(max_points);
                            let chunk = std::mem::replace(prev, rest);
                            buf.clear();
                            encode_block(&mut buf, &chunk)?;
                            write_block(&mut f, min_id, &buf).await?;
                            current_position += BLOCK_HEADER_SIZE + buf.len() as u32;
                        }
                    }
                    if carry.as_ref().map_or(false, |c| c.is_empty()) {
                        carry = None;
                    }
                }
            }

            if let Some(mut prev) = carry.take() {
                if !prev.ordered() {
                    prev.deduplicate();
                }
                write_chunked_blocks(&mut f, min_id, prev, &mut buf, &mut current_position, max_points)
                    .await?;
            }
        }

        let new_df = self
            .write_index_and_open(f, &path, min_time, max_time, &new_ids, &new_positions)
            .await?;

        {
            let mut state = self.state.write().await;
            state
                .files
                .retain(|df| !files.iter().any(|consumed| Arc::ptr_eq(df, consumed)));
            state.files.push(new_df);
            data_file::sort_data_files(&mut state.files);
        }

        self.schedule_delete(files.to_vec());
        Ok(())
    }
}
