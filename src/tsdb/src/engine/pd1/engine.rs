use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use bytes::BufMut;
use pointdb_utils::sync::WaitGroup;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, RwLock};
use tracing::{error, warn};

use crate::engine::pd1::catalog::{
    KeyCatalog, MeasurementFields, Series, COLLISIONS_FILE, FIELDS_FILE, IDS_FILE, SERIES_FILE,
};
use crate::engine::pd1::data_file::{self, DataFile};
use crate::engine::pd1::range_lock::RangeLock;
use crate::engine::pd1::tx::Tx;
use crate::engine::pd1::value::Values;
use crate::engine::pd1::{EngineOptions, MAGIC_NUMBER, SERIES_HEADER_SIZE, TRAILER_SIZE};
use crate::engine::FlushSink;

/// EngineState is the mutable record guarded by the files lock: the file
/// set, the file sequence counter and the compaction bookkeeping.
pub(crate) struct EngineState {
    pub files: Vec<Arc<DataFile>>,
    pub current_file_id: u32,
    pub compaction_running: bool,
    pub last_compaction_time: Option<Instant>,
}

/// Engine is one shard's storage engine: it owns the sealed data files, the
/// key catalog and the range lock, folds WAL flushes into the file set, and
/// serves read transactions over it.
pub struct Engine {
    me: Weak<Engine>,
    path: PathBuf,
    pub(crate) options: EngineOptions,
    pub(crate) write_lock: RangeLock,
    pub(crate) catalog: KeyCatalog,
    pub(crate) state: RwLock<EngineState>,
    query_lock: Arc<RwLock<()>>,
    closed: AtomicBool,
    pub(crate) deletes_pending: WaitGroup,
    fatal: watch::Sender<Option<String>>,
}

/// same_files reports whether two file set snapshots are identical, by
/// pointer identity and length.
pub(crate) fn same_files(a: &[Arc<DataFile>], b: &[Arc<DataFile>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

/// file_age is how long ago the file was sealed.
pub(crate) fn file_age(f: &DataFile) -> Duration {
    SystemTime::now()
        .duration_since(f.mod_time())
        .unwrap_or_default()
}

/// filter_data_between_times moves the values with timestamps in [min, max)
/// out of values_by_id into the returned map, dropping ids that end up
/// empty. Values are assumed sorted ascending by time.
fn filter_data_between_times(
    values_by_id: &mut HashMap<u64, Values>,
    min: i64,
    max: i64,
) -> HashMap<u64, Values> {
    let mut filtered = HashMap::with_capacity(values_by_id.len());
    let mut emptied = Vec::new();
    for (id, values) in values_by_id.iter_mut() {
        let taken = values.extract_between(min, max);
        if !taken.is_empty() {
            filtered.insert(*id, taken);
        }
        if values.is_empty() {
            emptied.push(*id);
        }
    }
    for id in emptied {
        values_by_id.remove(&id);
    }
    filtered
}

impl Engine {
    /// open scans the shard directory, memory-maps every sealed data file,
    /// discards partial files left by a crash, and loads the catalog.
    pub async fn open(path: impl AsRef<Path>, options: EngineOptions) -> anyhow::Result<Arc<Engine>> {
        let path = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&path).await?;

        // metadata staging files never survive a restart
        for name in [FIELDS_FILE, SERIES_FILE, IDS_FILE, COLLISIONS_FILE] {
            pointdb_storage::remove_file_if_exists(path.join(format!("{}tmp", name))).await?;
        }

        let mut files = Vec::new();
        let mut current_file_id = 0u32;
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = data_file::id_from_file_name(name) else { continue };
            if id > current_file_id {
                current_file_id = id;
            }
            match DataFile::open(entry.path()) {
                Ok(df) => files.push(df),
                Err(e) => {
                    // a crash mid-rewrite leaves a partial file behind
                    warn!(file = name, error = %e, "discarding invalid data file");
                    tokio::fs::remove_file(entry.path()).await?;
                }
            }
        }
        data_file::sort_data_files(&mut files);

        let catalog = KeyCatalog::new(&path);
        catalog.load().await?;

        let (fatal, _) = watch::channel(None);
        Ok(Arc::new_cyclic(|me| Engine {
            me: me.clone(),
            path,
            options,
            write_lock: RangeLock::new(),
            catalog,
            state: RwLock::new(EngineState {
                files,
                current_file_id,
                compaction_running: false,
                last_compaction_time: None,
            }),
            query_lock: Arc::new(RwLock::new(())),
            closed: AtomicBool::new(false),
            deletes_pending: WaitGroup::new(),
            fatal,
        }))
    }

    /// close waits for queries, metadata writes, in-flight file producers
    /// and pending deletions to quiesce, then drops the file set.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);

        let _query = self.query_lock.write().await;
        let _meta = self.catalog.lock_meta().await;
        self.write_lock.lock(i64::MIN, i64::MAX).await;
        {
            let mut state = self.state.write().await;
            self.deletes_pending.wait().await;
            state.files.clear();
            state.current_file_id = 0;
        }
        self.write_lock.unlock(i64::MIN, i64::MAX);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// data_file_count returns the number of sealed data files in the shard.
    pub async fn data_file_count(&self) -> usize {
        self.state.read().await.files.len()
    }

    /// fatal_watch exposes non-recoverable seal failures to the host. The
    /// value flips from None to the failure message at most once.
    pub fn fatal_watch(&self) -> watch::Receiver<Option<String>> {
        self.fatal.subscribe()
    }

    /// me upgrades the self-reference for handing owned clones to spawned
    /// tasks. The engine is only reachable through an Arc, so the upgrade
    /// cannot fail while a method runs.
    pub(crate) fn me(&self) -> Arc<Engine> {
        self.me.upgrade().expect("engine still referenced")
    }

    pub(crate) fn report_fatal(&self, err: &anyhow::Error) {
        error!(error = %err, "non-recoverable failure sealing data file");
        let _ = self.fatal.send(Some(err.to_string()));
    }

    /// load_metadata_index loads the persisted measurement field schemas and
    /// series metadata (series in sorted key order) so the host can rebuild
    /// its in-memory index.
    pub async fn load_metadata_index(
        &self,
    ) -> anyhow::Result<(HashMap<String, MeasurementFields>, BTreeMap<String, Series>)> {
        Ok((
            self.catalog.read_fields().await?,
            self.catalog.read_series().await?,
        ))
    }

    /// write is the WAL flush entry point: it persists catalog updates,
    /// resolves keys to ids, partitions the batch across the touched files
    /// and runs the rewrites in parallel under the range lock. The first
    /// rewrite error is returned; rewrites that succeeded stay visible.
    pub async fn write(
        &self,
        points_by_key: HashMap<String, Values>,
        fields_to_save: HashMap<String, MeasurementFields>,
        series_to_create: Vec<Series>,
    ) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("engine closed");
        }

        let converted = self
            .catalog
            .convert_keys_and_write_metadata(points_by_key, fields_to_save, series_to_create)
            .await?;
        let Some((min_time, max_time, values_by_id)) = converted else {
            return Ok(());
        };

        let (files, lock_start, lock_end) = self.files_and_lock(min_time, max_time).await;
        let result = self.write_partitioned(files, values_by_id).await;
        self.write_lock.unlock(lock_start, lock_end);
        result?;

        if !self.options.skip_compaction && self.should_compact().await {
            let engine = self.me();
            tokio::spawn(async move {
                if let Err(e) = engine.compact(false).await {
                    error!(error = %e, "compaction failed");
                }
            });
        }
        Ok(())
    }

    /// write_partitioned walks the touched files newest first, splitting the
    /// pending values into per-file rewrite tasks: small files absorb the
    /// whole slice down to their min time, rotated files get their exact
    /// range merged and anything newer written to a fresh file. Values older
    /// than every file end up in a fresh file of their own.
    async fn write_partitioned(
        &self,
        files: Vec<Arc<DataFile>>,
        mut values_by_id: HashMap<u64, Values>,
    ) -> anyhow::Result<()> {
        if files.is_empty() {
            return self.rewrite_file(None, values_by_id).await;
        }

        let mut tasks = tokio::task::JoinSet::new();
        let mut max_time_sofar = i64::MAX;
        for (i, f) in files.iter().enumerate().rev() {
            // stored max times are exclusive
            let file_max = f.max_time() + 1;
            let file_min = f.min_time();
            if f.size() < self.options.rotate_file_size {
                // the oldest small file also absorbs anything older than it,
                // so stale values don't splinter into files of their own
                let lower = if i == 0 { i64::MIN } else { file_min };
                let vals = filter_data_between_times(&mut values_by_id, lower, max_time_sofar);
                if !vals.is_empty() {
                    let engine = self.me();
                    let df = f.clone();
                    tasks.spawn(async move { engine.rewrite_file(Some(df), vals).await });
                }
            } else {
                let newer = filter_data_between_times(&mut values_by_id, file_max, max_time_sofar);
                if !newer.is_empty() {
                    let engine = self.me();
                    tasks.spawn(async move { engine.rewrite_file(None, newer).await });
                }
                let merged = filter_data_between_times(&mut values_by_id, file_min, file_max);
                if !merged.is_empty() {
                    let engine = self.me();
                    let df = f.clone();
                    tasks.spawn(async move { engine.rewrite_file(Some(df), merged).await });
                }
            }
            max_time_sofar = file_min;
        }

        // whatever remains is older than every file
        if !values_by_id.is_empty() {
            let engine = self.me();
            tasks.spawn(async move { engine.rewrite_file(None, values_by_id).await });
        }

        // report the first error in completion order, without reordering
        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            let res = match joined {
                Ok(r) => r,
                Err(e) => Err(anyhow!("rewrite task panicked: {}", e)),
            };
            if let Err(e) = res {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// files_and_lock snapshots the files whose time range intersects
    /// [min, max], widens the range to cover them fully, and takes the range
    /// lock. If a concurrent compaction or rewrite swapped the file set
    /// while we waited, the lock is released and the whole thing retried.
    async fn files_and_lock(&self, min: i64, max: i64) -> (Vec<Arc<DataFile>>, i64, i64) {
        loop {
            let files = self.copy_files().await;
            let touched: Vec<Arc<DataFile>> = files
                .iter()
                .filter(|f| min <= f.max_time() && f.min_time() <= max)
                .cloned()
                .collect();

            let (lock_start, lock_end) = if touched.is_empty() {
                (min, max)
            } else {
                (
                    touched[0].min_time().min(min),
                    touched[touched.len() - 1].max_time().max(max),
                )
            };

            self.write_lock.lock(lock_start, lock_end).await;

            let after = self.copy_files().await;
            if same_files(&files, &after) {
                return (touched, lock_start, lock_end);
            }
            self.write_lock.unlock(lock_start, lock_end);
        }
    }

    /// begin starts a read transaction over a consistent snapshot of the
    /// file set. The snapshot holds the query lock shared (blocking close)
    /// and a shared guard on every file (blocking deletion).
    pub async fn begin(&self, writable: bool) -> anyhow::Result<Tx> {
        let query_guard = self.query_lock.clone().read_owned().await;
        if self.closed.load(Ordering::SeqCst) {
            bail!("engine closed");
        }

        loop {
            let files = self.copy_files().await;
            let mut guards = Vec::with_capacity(files.len());
            for f in &files {
                guards.push(f.read_guard().await);
            }
            // a compaction may have deleted a file while we were acquiring
            if files.iter().any(|f| f.is_deleted()) {
                drop(guards);
                continue;
            }
            return Ok(Tx::new(self.me(), files, guards, query_guard, writable));
        }
    }

    /// perform_maintenance kicks a full compaction once the oldest file has
    /// aged past the full-compaction threshold, or a standard one when the
    /// usual eligibility holds.
    pub async fn perform_maintenance(&self) {
        if self.options.skip_compaction {
            return;
        }

        let full = {
            let state = self.state.read().await;
            state.files.len() >= 2
                && state
                    .files
                    .first()
                    .map(|f| file_age(f) > self.options.index_compaction_full_age)
                    .unwrap_or(false)
        };
        if full || self.should_compact().await {
            let engine = self.me();
            tokio::spawn(async move {
                if let Err(e) = engine.compact(full).await {
                    error!(error = %e, "maintenance compaction failed");
                }
            });
        }
    }

    /// key_field_id resolves the series id for a series key and field name.
    pub fn key_field_id(&self, series_key: &str, field: &str) -> u64 {
        self.catalog.key_field_id(series_key, field)
    }

    pub(crate) async fn copy_files(&self) -> Vec<Arc<DataFile>> {
        self.state.read().await.files.clone()
    }

    /// next_file_path claims the next sequence number and returns the path
    /// the new data file will seal under.
    pub(crate) async fn next_file_path(&self) -> PathBuf {
        let mut state = self.state.write().await;
        state.current_file_id += 1;
        data_file::data_file_path(&self.path, state.current_file_id)
    }

    /// write_index_and_open seals a data file: index entries in ascending id
    /// order, the time-range trailer, an fsync, then a fresh memory map over
    /// the result. A failure here is structural (the blocks are already
    /// committed but the file cannot be finished) and is surfaced on the
    /// fatal channel as well as returned.
    pub(crate) async fn write_index_and_open(
        &self,
        mut f: tokio::fs::File,
        path: &Path,
        min_time: i64,
        max_time: i64,
        ids: &[u64],
        positions: &[u32],
    ) -> anyhow::Result<Arc<DataFile>> {
        let res = async {
            let mut buf =
                Vec::with_capacity(ids.len() * SERIES_HEADER_SIZE as usize + TRAILER_SIZE as usize);
            for (id, pos) in ids.iter().zip(positions) {
                buf.put_u64(*id);
                buf.put_u32(*pos);
            }
            buf.put_u64(min_time as u64);
            buf.put_u64(max_time as u64);
            buf.put_u32(ids.len() as u32);

            f.write_all(&buf).await?;
            f.sync_all().await?;
            drop(f);

            DataFile::open(path)
        }
        .await;

        match res {
            Ok(df) => Ok(df),
            Err(e) => {
                self.report_fatal(&e);
                Err(e)
            }
        }
    }

    /// create_data_file opens the next sequenced file and writes the magic
    /// header.
    pub(crate) async fn create_data_file(&self) -> anyhow::Result<(tokio::fs::File, PathBuf)> {
        let path = self.next_file_path().await;
        let mut f = tokio::fs::File::create(&path).await?;
        f.write_all(&MAGIC_NUMBER.to_be_bytes()).await?;
        Ok((f, path))
    }

    /// schedule_delete unlinks the replaced files in the background once
    /// running queries have drained, tracked so close can wait for it.
    pub(crate) fn schedule_delete(&self, files: Vec<Arc<DataFile>>) {
        if files.is_empty() {
            return;
        }
        self.deletes_pending.add(1);
        let wg = self.deletes_pending.clone();
        tokio::spawn(async move {
            for f in files {
                if let Err(e) = f.delete().await {
                    error!(file = %f.path().display(), error = %e, "error deleting data file");
                }
            }
            wg.done();
        });
    }
}

#[async_trait]
impl FlushSink for Engine {
    async fn write(
        &self,
        points_by_key: HashMap<String, Values>,
        fields_to_save: HashMap<String, MeasurementFields>,
        series_to_create: Vec<Series>,
    ) -> anyhow::Result<()> {
        Engine::write(self, points_by_key, fields_to_save, series_to_create).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

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

    async fn read_series(engine: &Arc<Engine>, key: &str, field: &str) -> Vec<(i64, f64)> {
        let tx = engine.begin(false).await.unwrap();
        let mut cursor = tx.cursor(key, field, true);
        let mut out = Vec::new();
        let mut next = cursor.seek_to(i64::MIN).unwrap();
        while let Some((t, v)) = next {
            match v {
                FieldValue::Float(f) => out.push((t, f)),
                other => panic!("unexpected value type {:?}", other),
            }
            next = cursor.next().unwrap();
        }
        out
    }

    #[tokio::test]
    async fn test_single_flush_builds_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();

        let mut batch = HashMap::new();
        batch.insert("a#v".to_string(), floats(&[(10, 1.0), (20, 2.0), (30, 3.0)]));
        batch.insert("b#v".to_string(), floats(&[(15, 1.5), (25, 2.5)]));
        engine.write(batch, HashMap::new(), vec![]).await.unwrap();

        assert_eq!(engine.data_file_count().await, 1);
        let files = engine.copy_files().await;
        let f = &files[0];
        assert_eq!(f.min_time(), 10);
        assert_eq!(f.max_time(), 31);
        assert_eq!(f.series_count(), 2);

        // the lower id's first block sits right after the magic header
        let id_a = engine.key_field_id("a", "v");
        let id_b = engine.key_field_id("b", "v");
        let first = id_a.min(id_b);
        assert_eq!(f.starting_position_for_id(first), 4);

        assert_eq!(
            read_series(&engine, "a", "v").await,
            vec![(10, 1.0), (20, 2.0), (30, 3.0)]
        );
        assert_eq!(read_series(&engine, "b", "v").await, vec![(15, 1.5), (25, 2.5)]);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_merges_into_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();

        let mut batch = HashMap::new();
        batch.insert("a#v".to_string(), floats(&[(10, 1.0), (20, 2.0), (30, 3.0)]));
        batch.insert("b#v".to_string(), floats(&[(15, 1.5), (25, 2.5)]));
        engine.write(batch, HashMap::new(), vec![]).await.unwrap();

        // values straddling the file's range fold into it, including the one
        // older than the file
        write_floats(&engine, "a#v", &[(5, 0.5), (35, 3.5)]).await;

        assert_eq!(engine.data_file_count().await, 1);
        let files = engine.copy_files().await;
        assert_eq!(files[0].min_time(), 5);
        assert_eq!(files[0].max_time(), 36);

        assert_eq!(
            read_series(&engine, "a", "v").await,
            vec![(5, 0.5), (10, 1.0), (20, 2.0), (30, 3.0), (35, 3.5)]
        );
        assert_eq!(read_series(&engine, "b", "v").await, vec![(15, 1.5), (25, 2.5)]);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_newer_than_rotated_file_starts_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::default();
        // every file counts as rotated
        options.rotate_file_size = 0;
        let engine = Engine::open(dir.path(), options).await.unwrap();

        write_floats(&engine, "a#v", &[(10, 1.0), (20, 2.0), (30, 3.0)]).await;
        let old = engine.copy_files().await[0].clone();

        write_floats(&engine, "a#v", &[(35, 3.5)]).await;

        assert_eq!(engine.data_file_count().await, 2);
        let files = engine.copy_files().await;
        // the old file is untouched and the set stays sorted by min time
        assert!(Arc::ptr_eq(&files[0], &old));
        assert_eq!(files[1].min_time(), 35);
        assert_eq!(files[1].max_time(), 36);
        assert!(files[0].min_time() < files[1].min_time());

        assert_eq!(
            read_series(&engine, "a", "v").await,
            vec![(10, 1.0), (20, 2.0), (30, 3.0), (35, 3.5)]
        );

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_overlapping_rotated_file_splits() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::default();
        options.rotate_file_size = 0;
        let engine = Engine::open(dir.path(), options).await.unwrap();

        write_floats(&engine, "a#v", &[(10, 1.0), (20, 2.0), (30, 3.0)]).await;
        // one value lands inside the rotated file's range, one beyond it
        write_floats(&engine, "a#v", &[(20, 9.9), (35, 3.5)]).await;

        assert_eq!(engine.data_file_count().await, 2);
        assert_eq!(
            read_series(&engine, "a", "v").await,
            vec![(10, 1.0), (20, 9.9), (30, 3.0), (35, 3.5)]
        );

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();

        write_floats(&engine, "a#v", &[(20, 1.0)]).await;
        write_floats(&engine, "a#v", &[(20, 2.0)]).await;

        assert_eq!(engine.data_file_count().await, 1);
        assert_eq!(read_series(&engine, "a", "v").await, vec![(20, 2.0)]);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();

        engine.write(HashMap::new(), HashMap::new(), vec![]).await.unwrap();
        assert_eq!(engine.data_file_count().await, 0);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_restores_files_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        write_floats(&engine, "a#v", &[(10, 1.0), (20, 2.0)]).await;
        engine.close().await.unwrap();

        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        assert_eq!(engine.data_file_count().await, 1);
        assert_eq!(read_series(&engine, "a", "v").await, vec![(10, 1.0), (20, 2.0)]);

        // new files continue the sequence instead of clashing
        write_floats(&engine, "a#v", &[(40, 4.0)]).await;
        assert_eq!(
            read_series(&engine, "a", "v").await,
            vec![(10, 1.0), (20, 2.0), (40, 4.0)]
        );

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        write_floats(&engine, "a#v", &[(10, 1.0)]).await;
        engine.close().await.unwrap();

        // simulate a crash mid-rewrite: a header-only file
        std::fs::write(dir.path().join("0000002.pd1"), 0x16D116D1u32.to_be_bytes()).unwrap();

        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        assert_eq!(engine.data_file_count().await, 1);
        assert!(!dir.path().join("0000002.pd1").exists());

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_after_close_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        engine.close().await.unwrap();

        assert!(engine.begin(false).await.is_err());
        assert!(engine
            .write(HashMap::new(), HashMap::new(), vec![])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_engine_is_a_flush_sink() {
        use crate::engine::pd1::catalog::{Field, FieldKind, MeasurementFields, Series};
        use crate::engine::FlushSink;

        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();

        let mut batch = HashMap::new();
        batch.insert("cpu,host=a#value".to_string(), floats(&[(10, 1.0)]));

        let mut fields = HashMap::new();
        let mut mf = MeasurementFields::default();
        mf.fields.insert(
            "value".to_string(),
            Field {
                id: 1,
                name: "value".to_string(),
                kind: FieldKind::Float,
            },
        );
        fields.insert("cpu".to_string(), mf);
        let series = vec![Series {
            key: "cpu,host=a".to_string(),
            tags: [("host".to_string(), "a".to_string())].into_iter().collect(),
        }];

        // drive the engine through the capability the WAL holds
        let sink: Arc<dyn FlushSink> = engine.clone();
        sink.write(batch, fields, series).await.unwrap();

        assert_eq!(
            read_series(&engine, "cpu,host=a", "value").await,
            vec![(10, 1.0)]
        );

        let (fields, series) = engine.load_metadata_index().await.unwrap();
        assert!(fields["cpu"].fields.contains_key("value"));
        assert_eq!(series["cpu,host=a"].tags["host"], "a");

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tx_reports_writability() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();

        let tx = engine.begin(true).await.unwrap();
        assert!(tx.writable());
        drop(tx);

        let tx = engine.begin(false).await.unwrap();
        assert!(!tx.writable());
        drop(tx);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_readers_pin_replaced_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineOptions::default()).await.unwrap();
        write_floats(&engine, "a#v", &[(20, 1.0)]).await;

        let old = engine.copy_files().await[0].clone();
        let tx = engine.begin(false).await.unwrap();

        // the rewrite swaps in a new file but cannot unlink the old one
        // while the transaction holds it
        write_floats(&engine, "a#v", &[(20, 2.0)]).await;
        assert!(old.path().exists());

        // the snapshot still reads the old value
        let mut cursor = tx.cursor("a", "v", true);
        assert_eq!(cursor.seek_to(0).unwrap(), Some((20, FieldValue::Float(1.0))));
        drop(cursor);
        drop(tx);

        engine.deletes_pending.wait().await;
        assert!(!old.path().exists());

        assert_eq!(read_series(&engine, "a", "v").await, vec![(20, 2.0)]);
        engine.close().await.unwrap();
    }
}
