use std::sync::Arc;

use crate::engine::pd1::block::decode_block;
use crate::engine::pd1::data_file::DataFile;
use crate::engine::pd1::value::{FieldValue, Values};
use crate::engine::pd1::BLOCK_HEADER_SIZE;

/// Cursor iterates one series' values in ascending time order across the
/// time-ordered set of data files. Blocks for an id are contiguous within a
/// file, so iteration walks blocks until the id changes, then moves to the
/// id's first block in the next file.
pub struct Cursor {
    id: u64,
    files: Vec<Arc<DataFile>>,
    files_pos: usize,
    f: Option<Arc<DataFile>>,
    pos: u32,
    vals: Option<Values>,
    head: usize,
    ascending: bool,
}

impl Cursor {
    pub fn new(id: u64, files: Vec<Arc<DataFile>>, ascending: bool) -> Self {
        Self {
            id,
            files,
            files_pos: 0,
            f: None,
            pos: 0,
            vals: None,
            head: 0,
            ascending,
        }
    }

    /// ascending reports the declared scan direction. Only the ascending
    /// direction is implemented.
    pub fn ascending(&self) -> bool {
        self.ascending
    }

    /// seek_to positions the cursor at the first value with time >= seek and
    /// returns it, or None when no such value exists in any file.
    pub fn seek_to(&mut self, seek: i64) -> anyhow::Result<Option<(i64, FieldValue)>> {
        self.vals = None;
        self.head = 0;
        self.f = None;

        // pick the first file that could hold the target; a seek before all
        // files starts at the first
        let mut files_pos = None;
        for (i, f) in self.files.iter().enumerate() {
            if seek <= f.max_time() {
                files_pos = Some(i);
                break;
            }
        }
        let Some(mut files_pos) = files_pos else {
            self.files_pos = self.files.len();
            return Ok(None);
        };

        loop {
            if files_pos >= self.files.len() {
                self.files_pos = files_pos;
                return Ok(None);
            }
            let f = self.files[files_pos].clone();

            let mut pos = f.starting_position_for_id(self.id);
            if pos == 0 {
                // id has no data in this file
                files_pos += 1;
                continue;
            }

            loop {
                let Some((_, _, block)) = f.block(pos) else { break };
                let next_pos = pos + BLOCK_HEADER_SIZE + block.len() as u32;

                // if the next block is ours and still starts at or before
                // the target, this one cannot hold it; skip the decode
                if let Some((nid, nt, _)) = f.block(next_pos) {
                    if nid == self.id && nt <= seek {
                        pos = next_pos;
                        continue;
                    }
                }

                // the value is in this block or not in this file at all
                self.f = Some(f.clone());
                self.files_pos = files_pos;
                let (t, v) = self.decode_block_and_get_values(pos)?;
                if t >= seek {
                    return Ok(Some((t, v)));
                }

                if let Some(vals) = &self.vals {
                    while self.head < vals.len() {
                        let vt = vals.time_at(self.head);
                        if vt >= seek {
                            let vv = vals.value_at(self.head);
                            self.head += 1;
                            return Ok(Some((vt, vv)));
                        }
                        self.head += 1;
                    }
                }
                break;
            }

            files_pos += 1;
        }
    }

    /// next returns the series' next value: first from the decoded block,
    /// then from the next contiguous block for the id, then from the id's
    /// first block in the next file. None once every file is exhausted.
    pub fn next(&mut self) -> anyhow::Result<Option<(i64, FieldValue)>> {
        if let Some(vals) = &self.vals {
            if self.head < vals.len() {
                let t = vals.time_at(self.head);
                let v = vals.value_at(self.head);
                self.head += 1;
                return Ok(Some((t, v)));
            }
        }

        // drained the decoded block; the next block in this file is ours
        // only while the id matches
        if let Some(f) = self.f.clone() {
            if let Some((nid, _, _)) = f.block(self.pos) {
                if nid == self.id {
                    return self.decode_block_and_get_values(self.pos).map(Some);
                }
            }
            self.files_pos += 1;
        }

        while self.files_pos < self.files.len() {
            let f = self.files[self.files_pos].clone();
            let starting = f.starting_position_for_id(self.id);
            if starting == 0 {
                self.files_pos += 1;
                continue;
            }
            self.f = Some(f);
            return self.decode_block_and_get_values(starting).map(Some);
        }

        self.f = None;
        Ok(None)
    }

    fn decode_block_and_get_values(&mut self, position: u32) -> anyhow::Result<(i64, FieldValue)> {
        let f = self
            .f
            .clone()
            .ok_or_else(|| anyhow!("cursor has no current file"))?;
        let (_, _, block) = f
            .block(position)
            .ok_or_else(|| anyhow!("cursor read into the index region at {}", position))?;
        let new_pos = position + BLOCK_HEADER_SIZE + block.len() as u32;
        let vals = decode_block(block)?;

        self.pos = new_pos;
        let t = vals.time_at(0);
        let v = vals.value_at(0);
        self.vals = Some(vals);
        self.head = 1;
        Ok((t, v))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::engine::pd1::cursor::Cursor;
    use crate::engine::pd1::engine::Engine;
    use crate::engine::pd1::value::{FieldValue, TimeValue, Values};
    use crate::engine::pd1::EngineOptions;

    fn floats(points: &[(i64, f64)]) -> Values {
        Values::Float(points.iter().map(|(t, v)| TimeValue::new(*t, *v)).collect())
    }

    async fn write_floats(engine: &Arc<Engine>, key: &str, points: &[(i64, f64)]) {
        let mut m = HashMap::new();
        m.insert(key.to_string(), floats(points));
        engine.write(m, HashMap::new(), vec![]).await.unwrap();
    }

    async fn cursor_for(engine: &Arc<Engine>, key: &str, field: &str) -> Cursor {
        Cursor::new(
            engine.key_field_id(key, field),
            engine.copy_files().await,
            true,
        )
    }

    #[tokio::test]
    async fn test_seek_and_next_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        write_floats(&engine, "a#v", &[(10, 1.0), (20, 2.0), (30, 3.0)]).await;
        write_floats(&engine, "b#v", &[(15, 1.5), (25, 2.5)]).await;

        let mut c = cursor_for(&engine, "a", "v").await;
        assert!(c.ascending());
        assert_eq!(c.seek_to(0).unwrap(), Some((10, FieldValue::Float(1.0))));
        assert_eq!(c.next().unwrap(), Some((20, FieldValue::Float(2.0))));

        assert_eq!(c.seek_to(25).unwrap(), Some((30, FieldValue::Float(3.0))));
        assert_eq!(c.next().unwrap(), None);

        let mut c = cursor_for(&engine, "b", "v").await;
        assert_eq!(c.seek_to(0).unwrap(), Some((15, FieldValue::Float(1.5))));
        assert_eq!(c.next().unwrap(), Some((25, FieldValue::Float(2.5))));
        assert_eq!(c.next().unwrap(), None);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_crosses_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        write_floats(&engine, "a#v", &[(10, 1.0), (20, 2.0)]).await;
        // newer than the first file's range, so it seals into its own file
        write_floats(&engine, "a#v", &[(40, 4.0)]).await;
        assert_eq!(engine.data_file_count().await, 2);

        let mut c = cursor_for(&engine, "a", "v").await;
        assert_eq!(c.seek_to(0).unwrap(), Some((10, FieldValue::Float(1.0))));
        assert_eq!(c.next().unwrap(), Some((20, FieldValue::Float(2.0))));
        assert_eq!(c.next().unwrap(), Some((40, FieldValue::Float(4.0))));
        assert_eq!(c.next().unwrap(), None);

        // a seek into the gap between files lands on the later file
        assert_eq!(c.seek_to(25).unwrap(), Some((40, FieldValue::Float(4.0))));

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_skips_blocks_before_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::default();
        options.max_points_per_block = 2;
        let engine = Engine::open(dir.path(), options).await.unwrap();
        write_floats(&engine, "a#v", &[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0)]).await;

        let mut c = cursor_for(&engine, "a", "v").await;
        // 5 lives in the last of three blocks
        assert_eq!(c.seek_to(5).unwrap(), Some((5, FieldValue::Float(5.0))));
        assert_eq!(c.next().unwrap(), None);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        write_floats(&engine, "a#v", &[(10, 1.0)]).await;

        let mut c = cursor_for(&engine, "missing", "v").await;
        assert_eq!(c.seek_to(0).unwrap(), None);
        assert_eq!(c.next().unwrap(), None);

        engine.close().await.unwrap();
    }
}
