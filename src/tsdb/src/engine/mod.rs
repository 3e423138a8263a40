use std::collections::HashMap;

use crate::engine::pd1::catalog::{MeasurementFields, Series};
use crate::engine::pd1::value::Values;

pub mod pd1;

/// FlushSink is the narrow capability a write-ahead log needs from the
/// storage engine that owns it: accept a flushed batch of points together
/// with the catalog entries created while the batch was buffered. Passing
/// the sink at construction keeps the WAL free of a back-pointer to the
/// concrete engine.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn write(
        &self,
        points_by_key: HashMap<String, Values>,
        fields_to_save: HashMap<String, MeasurementFields>,
        series_to_create: Vec<Series>,
    ) -> anyhow::Result<()>;
}
