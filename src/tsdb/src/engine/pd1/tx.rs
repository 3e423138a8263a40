use std::sync::Arc;

use tokio::sync::OwnedRwLockReadGuard;

use crate::engine::pd1::cursor::Cursor;
use crate::engine::pd1::data_file::DataFile;
use crate::engine::pd1::engine::Engine;

/// Tx is a read transaction over a consistent snapshot of the file set. The
/// transaction holds the engine's query lock shared, keeping close out, and
/// a shared guard on every snapshotted file, keeping deletion out, until it
/// is dropped. Files swapped in after begin stay invisible.
pub struct Tx {
    engine: Arc<Engine>,
    files: Vec<Arc<DataFile>>,
    writable: bool,
    _file_guards: Vec<OwnedRwLockReadGuard<()>>,
    _query_guard: OwnedRwLockReadGuard<()>,
}

impl Tx {
    pub(crate) fn new(
        engine: Arc<Engine>,
        files: Vec<Arc<DataFile>>,
        file_guards: Vec<OwnedRwLockReadGuard<()>>,
        query_guard: OwnedRwLockReadGuard<()>,
        writable: bool,
    ) -> Self {
        Self {
            engine,
            files,
            writable,
            _file_guards: file_guards,
            _query_guard: query_guard,
        }
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// cursor opens an iterator over one series' values within this
    /// transaction's snapshot, resolving the series id through the catalog's
    /// collision map.
    pub fn cursor(&self, series_key: &str, field: &str, ascending: bool) -> Cursor {
        let id = self.engine.key_field_id(series_key, field);
        Cursor::new(id, self.files.clone(), ascending)
    }
}
