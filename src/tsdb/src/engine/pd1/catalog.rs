use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock as StdRwLock;

use pointdb_utils::hash::fnv1a_sum64;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::engine::pd1::value::Values;

/// FIELDS_FILE stores the compressed measurement field schemas.
pub const FIELDS_FILE: &str = "fields";

/// SERIES_FILE stores the compressed series metadata.
pub const SERIES_FILE: &str = "series";

/// IDS_FILE stores the compressed key-to-id assignments.
pub const IDS_FILE: &str = "ids";

/// COLLISIONS_FILE stores the keys whose hash collided with an id already
/// assigned to a different key.
pub const COLLISIONS_FILE: &str = "collisions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Float,
    Integer,
    Boolean,
    String,
    Unsigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: u8,
    pub name: String,
    pub kind: FieldKind,
}

/// MeasurementFields is the field schema of one measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementFields {
    pub fields: HashMap<String, Field>,
}

/// Series is the metadata persisted for one series key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub key: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// series_field_key joins a series key and field name into the string that
/// is hashed to a series id.
pub fn series_field_key(series_key: &str, field: &str) -> String {
    format!("{}#{}", series_key, field)
}

/// KeyCatalog owns the snappy-compressed metadata blobs stored next to the
/// data files: key-to-id assignments, measurement field schemas, series
/// metadata and hash-collision overrides. Every blob write is serialized by
/// the internal meta lock and staged through an atomic rename.
pub struct KeyCatalog {
    path: PathBuf,
    meta_lock: Mutex<()>,
    collisions: StdRwLock<HashMap<String, u64>>,
}

impl KeyCatalog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            meta_lock: Mutex::new(()),
            collisions: StdRwLock::new(HashMap::new()),
        }
    }

    /// load reads the collision map into memory. Called once at engine open.
    pub async fn load(&self) -> anyhow::Result<()> {
        let mut collisions = HashMap::new();
        if let Some(data) = self.read_compressed_file(COLLISIONS_FILE).await? {
            collisions = serde_json::from_slice(&data)?;
        }
        *self.collisions.write().unwrap() = collisions;
        Ok(())
    }

    /// lock_meta exposes the catalog's exclusive guard so engine close can
    /// quiesce metadata writes.
    pub async fn lock_meta(&self) -> MutexGuard<'_, ()> {
        self.meta_lock.lock().await
    }

    /// key_field_id resolves the series id a cursor should scan for a
    /// series key and field name, honoring recorded hash collisions.
    pub fn key_field_id(&self, series_key: &str, field: &str) -> u64 {
        let key = series_field_key(series_key, field);
        if let Some(id) = self.collisions.read().unwrap().get(&key) {
            return *id;
        }
        fnv1a_sum64(key.as_bytes())
    }

    /// convert_keys_and_write_metadata persists any new field schemas and
    /// series, then resolves every key in the batch to its series id,
    /// assigning and recording new ids as needed. Returns the batch's
    /// overall time range and the values re-keyed by id, or None when the
    /// batch carries no points.
    pub async fn convert_keys_and_write_metadata(
        &self,
        points_by_key: HashMap<String, Values>,
        fields_to_save: HashMap<String, MeasurementFields>,
        series_to_create: Vec<Series>,
    ) -> anyhow::Result<Option<(i64, i64, HashMap<u64, Values>)>> {
        let _meta = self.meta_lock.lock().await;

        self.write_new_fields(fields_to_save).await?;
        self.write_new_series(series_to_create).await?;

        if points_by_key.is_empty() {
            return Ok(None);
        }

        // read in the assigned ids and hand out ids for any new keys
        let mut ids: HashMap<String, u64> = match self.read_compressed_file(IDS_FILE).await? {
            Some(data) => serde_json::from_slice(&data)?,
            None => HashMap::new(),
        };

        let mut values_by_id = HashMap::with_capacity(points_by_key.len());
        let mut id_to_key: HashMap<u64, String> = HashMap::new();
        let mut new_collisions: HashMap<String, u64> = HashMap::new();
        let mut new_keys = false;

        let mut min_time = i64::MAX;
        let mut max_time = i64::MIN;

        for (key, values) in points_by_key {
            if values.is_empty() {
                continue;
            }

            let id = match ids.get(&key).copied() {
                Some(id) => id,
                None => {
                    if id_to_key.is_empty() {
                        for (k, id) in &ids {
                            id_to_key.insert(*id, k.clone());
                        }
                    }

                    let mut hash_id = fnv1a_sum64(key.as_bytes());
                    let collides = matches!(id_to_key.get(&hash_id), Some(existing) if *existing != key);
                    if collides {
                        // hash collision: hand out the smallest unused
                        // positive id and remember the override
                        hash_id = 0;
                        loop {
                            hash_id += 1;
                            if !id_to_key.contains_key(&hash_id) {
                                break;
                            }
                        }
                        new_collisions.insert(key.clone(), hash_id);
                    }

                    new_keys = true;
                    ids.insert(key.clone(), hash_id);
                    id_to_key.insert(hash_id, key);
                    hash_id
                }
            };

            min_time = min_time.min(values.min_time());
            max_time = max_time.max(values.max_time());
            values_by_id.insert(id, values);
        }

        if new_keys {
            let data = serde_json::to_vec(&ids)?;
            self.replace_compressed_file(IDS_FILE, &data).await?;
        }
        if !new_collisions.is_empty() {
            self.save_new_collisions(new_collisions).await?;
        }

        if values_by_id.is_empty() {
            return Ok(None);
        }
        Ok(Some((min_time, max_time, values_by_id)))
    }

    async fn save_new_collisions(&self, new: HashMap<String, u64>) -> anyhow::Result<()> {
        let merged = {
            let mut collisions = self.collisions.write().unwrap();
            collisions.extend(new);
            collisions.clone()
        };
        let data = serde_json::to_vec(&merged)?;
        self.replace_compressed_file(COLLISIONS_FILE, &data).await
    }

    async fn write_new_fields(
        &self,
        fields_to_save: HashMap<String, MeasurementFields>,
    ) -> anyhow::Result<()> {
        if fields_to_save.is_empty() {
            return Ok(());
        }

        let mut fields = self.read_fields_inner().await?;
        fields.extend(fields_to_save);

        let data = serde_json::to_vec(&fields)?;
        self.replace_compressed_file(FIELDS_FILE, &data).await
    }

    async fn write_new_series(&self, series_to_create: Vec<Series>) -> anyhow::Result<()> {
        if series_to_create.is_empty() {
            return Ok(());
        }

        let mut series = self.read_series_inner().await?;
        for s in series_to_create {
            series.insert(s.key.clone(), s);
        }

        let data = serde_json::to_vec(&series)?;
        self.replace_compressed_file(SERIES_FILE, &data).await
    }

    /// read_fields loads every persisted measurement field schema.
    pub async fn read_fields(&self) -> anyhow::Result<HashMap<String, MeasurementFields>> {
        let _meta = self.meta_lock.lock().await;
        self.read_fields_inner().await
    }

    /// read_series loads the persisted series metadata, keyed by series key.
    pub async fn read_series(&self) -> anyhow::Result<BTreeMap<String, Series>> {
        let _meta = self.meta_lock.lock().await;
        self.read_series_inner().await
    }

    async fn read_fields_inner(&self) -> anyhow::Result<HashMap<String, MeasurementFields>> {
        match self.read_compressed_file(FIELDS_FILE).await? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn read_series_inner(&self) -> anyhow::Result<BTreeMap<String, Series>> {
        match self.read_compressed_file(SERIES_FILE).await? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn read_compressed_file(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path.join(name);
        let b = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = snap::raw::Decoder::new()
            .decompress_vec(&b)
            .map_err(|e| anyhow!("decompress {}: {}", name, e))?;
        Ok(Some(data))
    }

    async fn replace_compressed_file(&self, name: &str, data: &[u8]) -> anyhow::Result<()> {
        let b = snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| anyhow!("compress {}: {}", name, e))?;
        pointdb_storage::replace_file(self.path.join(name), &b).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pointdb_utils::hash::fnv1a_sum64;

    use crate::engine::pd1::catalog::{
        series_field_key, Field, FieldKind, KeyCatalog, MeasurementFields, Series, IDS_FILE,
    };
    use crate::engine::pd1::value::{TimeValue, Values};

    fn one_point(key: &str, t: i64) -> HashMap<String, Values> {
        let mut m = HashMap::new();
        m.insert(key.to_string(), Values::Float(vec![TimeValue::new(t, 1.0)]));
        m
    }

    #[tokio::test]
    async fn test_convert_keys_assigns_hash_id() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = KeyCatalog::new(dir.path());

        let (min, max, by_id) = catalog
            .convert_keys_and_write_metadata(one_point("cpu#value", 42), HashMap::new(), vec![])
            .await
            .unwrap()
            .unwrap();

        assert_eq!((min, max), (42, 42));
        assert!(by_id.contains_key(&fnv1a_sum64(b"cpu#value")));

        // a second batch for the same key reuses the persisted assignment
        let (_, _, by_id) = catalog
            .convert_keys_and_write_metadata(one_point("cpu#value", 43), HashMap::new(), vec![])
            .await
            .unwrap()
            .unwrap();
        assert!(by_id.contains_key(&fnv1a_sum64(b"cpu#value")));
    }

    #[tokio::test]
    async fn test_convert_keys_collision_fallback() {
        let dir = tempfile::tempdir().unwrap();

        // seed the ids blob so a different key already owns this key's hash
        let key = series_field_key("cpu,host=a", "value");
        let mut seeded = HashMap::new();
        seeded.insert("other#value".to_string(), fnv1a_sum64(key.as_bytes()));
        let data = serde_json::to_vec(&seeded).unwrap();
        let b = snap::raw::Encoder::new().compress_vec(&data).unwrap();
        pointdb_storage::replace_file(dir.path().join(IDS_FILE), &b)
            .await
            .unwrap();

        let catalog = KeyCatalog::new(dir.path());
        let (_, _, by_id) = catalog
            .convert_keys_and_write_metadata(one_point(&key, 1), HashMap::new(), vec![])
            .await
            .unwrap()
            .unwrap();

        // the colliding key got the smallest unused positive id
        assert!(by_id.contains_key(&1));
        assert_eq!(catalog.key_field_id("cpu,host=a", "value"), 1);

        // a fresh catalog sees the collision from disk
        let reopened = KeyCatalog::new(dir.path());
        reopened.load().await.unwrap();
        assert_eq!(reopened.key_field_id("cpu,host=a", "value"), 1);
    }

    #[tokio::test]
    async fn test_fields_and_series_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = KeyCatalog::new(dir.path());

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
        fields.insert("cpu".to_string(), mf.clone());

        let series = vec![Series {
            key: "cpu,host=a".to_string(),
            tags: [("host".to_string(), "a".to_string())].into_iter().collect(),
        }];

        catalog
            .convert_keys_and_write_metadata(HashMap::new(), fields, series)
            .await
            .unwrap();

        assert_eq!(catalog.read_fields().await.unwrap()["cpu"], mf);
        assert_eq!(
            catalog.read_series().await.unwrap()["cpu,host=a"].tags["host"],
            "a"
        );
    }
}
