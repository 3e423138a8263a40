use std::fmt::Debug;

use crate::engine::pd1::codec::{
    BLOCK_BOOLEAN, BLOCK_FLOAT64, BLOCK_INTEGER, BLOCK_STRING, BLOCK_UNSIGNED,
};

/// FieldType is implemented by the scalar payloads a series can carry.
pub trait FieldType: Send + Sync + Sized + Debug + Clone + PartialOrd + PartialEq {}

impl FieldType for f64 {}
impl FieldType for i64 {}
impl FieldType for u64 {}
impl FieldType for bool {}
impl FieldType for Vec<u8> {}

/// TimeValue pairs a nanosecond timestamp with one scalar payload.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct TimeValue<T>
where
    T: FieldType,
{
    pub unix_nano: i64,
    pub value: T,
}

impl<T> TimeValue<T>
where
    T: FieldType,
{
    pub fn new(unix_nano: i64, value: T) -> Self {
        Self { unix_nano, value }
    }
}

pub type TypeValues<T> = Vec<TimeValue<T>>;

/// SeriesValues are the ordering operations shared by every typed run of
/// values.
pub trait SeriesValues {
    fn min_time(&self) -> i64;
    fn max_time(&self) -> i64;
    fn ordered(&self) -> bool;
    fn deduplicate(&mut self);
    /// search returns the first index whose timestamp is >= t, or len() when
    /// every timestamp precedes t.
    fn search(&self, t: i64) -> usize;
}

impl<T> SeriesValues for TypeValues<T>
where
    T: FieldType,
{
    fn min_time(&self) -> i64 {
        self[0].unix_nano
    }

    fn max_time(&self) -> i64 {
        self[self.len() - 1].unix_nano
    }

    fn ordered(&self) -> bool {
        self.windows(2).all(|w| w[0].unix_nano < w[1].unix_nano)
    }

    fn deduplicate(&mut self) {
        if self.len() <= 1 || self.ordered() {
            return;
        }

        // stable sort, then keep the last value of each equal-timestamp run
        // so later writers win
        self.sort_by(|x, y| x.unix_nano.cmp(&y.unix_nano));
        let mut i = 0;
        for j in 1..self.len() {
            let v = self[j].clone();
            if v.unix_nano != self[i].unix_nano {
                i += 1;
            }
            self[i] = v;
        }
        self.truncate(i + 1);
    }

    fn search(&self, t: i64) -> usize {
        self.partition_point(|v| v.unix_nano < t)
    }
}

fn extract_between<T>(values: &mut TypeValues<T>, min: i64, max: i64) -> TypeValues<T>
where
    T: FieldType,
{
    let lo = values.search(min);
    let hi = values.search(max);
    if lo == 0 && hi == values.len() {
        return std::mem::take(values);
    }
    values.drain(lo..hi).collect()
}

/// FieldValue is one decoded scalar payload handed out by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Bool(bool),
    Str(Vec<u8>),
    Unsigned(u64),
}

/// Values holds one series' run of points, all of one payload type, in
/// ascending time order.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Float(TypeValues<f64>),
    Integer(TypeValues<i64>),
    Bool(TypeValues<bool>),
    Str(TypeValues<Vec<u8>>),
    Unsigned(TypeValues<u64>),
}

impl Values {
    pub fn block_type(&self) -> u8 {
        match self {
            Self::Float(_) => BLOCK_FLOAT64,
            Self::Integer(_) => BLOCK_INTEGER,
            Self::Bool(_) => BLOCK_BOOLEAN,
            Self::Str(_) => BLOCK_STRING,
            Self::Unsigned(_) => BLOCK_UNSIGNED,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Str(v) => v.len(),
            Self::Unsigned(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// min_time returns the first timestamp. Values must not be empty.
    pub fn min_time(&self) -> i64 {
        match self {
            Self::Float(v) => v.min_time(),
            Self::Integer(v) => v.min_time(),
            Self::Bool(v) => v.min_time(),
            Self::Str(v) => v.min_time(),
            Self::Unsigned(v) => v.min_time(),
        }
    }

    /// max_time returns the last timestamp. Values must not be empty.
    pub fn max_time(&self) -> i64 {
        match self {
            Self::Float(v) => v.max_time(),
            Self::Integer(v) => v.max_time(),
            Self::Bool(v) => v.max_time(),
            Self::Str(v) => v.max_time(),
            Self::Unsigned(v) => v.max_time(),
        }
    }

    pub fn ordered(&self) -> bool {
        match self {
            Self::Float(v) => v.ordered(),
            Self::Integer(v) => v.ordered(),
            Self::Bool(v) => v.ordered(),
            Self::Str(v) => v.ordered(),
            Self::Unsigned(v) => v.ordered(),
        }
    }

    /// deduplicate sorts by time and collapses equal timestamps, keeping the
    /// last occurrence so the newest writer wins.
    pub fn deduplicate(&mut self) {
        match self {
            Self::Float(v) => v.deduplicate(),
            Self::Integer(v) => v.deduplicate(),
            Self::Bool(v) => v.deduplicate(),
            Self::Str(v) => v.deduplicate(),
            Self::Unsigned(v) => v.deduplicate(),
        }
    }

    pub fn search(&self, t: i64) -> usize {
        match self {
            Self::Float(v) => v.search(t),
            Self::Integer(v) => v.search(t),
            Self::Bool(v) => v.search(t),
            Self::Str(v) => v.search(t),
            Self::Unsigned(v) => v.search(t),
        }
    }

    /// append moves all of other onto the end of self. The payload types
    /// must match.
    pub fn append(&mut self, other: Values) -> anyhow::Result<()> {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.extend(b),
            (Self::Integer(a), Self::Integer(b)) => a.extend(b),
            (Self::Bool(a), Self::Bool(b)) => a.extend(b),
            (Self::Str(a), Self::Str(b)) => a.extend(b),
            (Self::Unsigned(a), Self::Unsigned(b)) => a.extend(b),
            (a, b) => bail!(
                "cannot append block type {} to block type {}",
                b.block_type(),
                a.block_type()
            ),
        }
        Ok(())
    }

    /// split_off divides self at index at, keeping [0, at) and returning
    /// [at, len).
    pub fn split_off(&mut self, at: usize) -> Values {
        match self {
            Self::Float(v) => Self::Float(v.split_off(at)),
            Self::Integer(v) => Self::Integer(v.split_off(at)),
            Self::Bool(v) => Self::Bool(v.split_off(at)),
            Self::Str(v) => Self::Str(v.split_off(at)),
            Self::Unsigned(v) => Self::Unsigned(v.split_off(at)),
        }
    }

    /// extract_between removes and returns the values with timestamps in
    /// [min, max), splicing the remainder back together.
    pub fn extract_between(&mut self, min: i64, max: i64) -> Values {
        match self {
            Self::Float(v) => Self::Float(extract_between(v, min, max)),
            Self::Integer(v) => Self::Integer(extract_between(v, min, max)),
            Self::Bool(v) => Self::Bool(extract_between(v, min, max)),
            Self::Str(v) => Self::Str(extract_between(v, min, max)),
            Self::Unsigned(v) => Self::Unsigned(extract_between(v, min, max)),
        }
    }

    /// same_type_empty returns a fresh empty Values of self's payload type.
    pub fn same_type_empty(&self) -> Values {
        match self {
            Self::Float(_) => Self::Float(vec![]),
            Self::Integer(_) => Self::Integer(vec![]),
            Self::Bool(_) => Self::Bool(vec![]),
            Self::Str(_) => Self::Str(vec![]),
            Self::Unsigned(_) => Self::Unsigned(vec![]),
        }
    }

    pub fn time_at(&self, i: usize) -> i64 {
        match self {
            Self::Float(v) => v[i].unix_nano,
            Self::Integer(v) => v[i].unix_nano,
            Self::Bool(v) => v[i].unix_nano,
            Self::Str(v) => v[i].unix_nano,
            Self::Unsigned(v) => v[i].unix_nano,
        }
    }

    pub fn value_at(&self, i: usize) -> FieldValue {
        match self {
            Self::Float(v) => FieldValue::Float(v[i].value),
            Self::Integer(v) => FieldValue::Integer(v[i].value),
            Self::Bool(v) => FieldValue::Bool(v[i].value),
            Self::Str(v) => FieldValue::Str(v[i].value.clone()),
            Self::Unsigned(v) => FieldValue::Unsigned(v[i].value),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::pd1::value::{TimeValue, Values};

    fn floats(points: &[(i64, f64)]) -> Values {
        Values::Float(points.iter().map(|(t, v)| TimeValue::new(*t, *v)).collect())
    }

    #[test]
    fn test_deduplicate_last_wins() {
        let mut v = floats(&[(10, 1.0), (20, 1.0), (10, 2.0), (30, 1.0)]);
        v.deduplicate();
        assert_eq!(v, floats(&[(10, 2.0), (20, 1.0), (30, 1.0)]));
    }

    #[test]
    fn test_deduplicate_ordered_noop() {
        let mut v = floats(&[(10, 1.0), (20, 2.0)]);
        v.deduplicate();
        assert_eq!(v, floats(&[(10, 1.0), (20, 2.0)]));
    }

    #[test]
    fn test_extract_between_middle() {
        let mut v = floats(&[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)]);
        let taken = v.extract_between(20, 40);
        assert_eq!(taken, floats(&[(20, 2.0), (30, 3.0)]));
        assert_eq!(v, floats(&[(10, 1.0), (40, 4.0)]));
    }

    #[test]
    fn test_extract_between_all() {
        let mut v = floats(&[(10, 1.0), (20, 2.0)]);
        let taken = v.extract_between(i64::MIN, i64::MAX);
        assert_eq!(taken.len(), 2);
        assert!(v.is_empty());
    }

    #[test]
    fn test_append_type_mismatch() {
        let mut v = floats(&[(10, 1.0)]);
        let other = Values::Integer(vec![TimeValue::new(20, 7i64)]);
        assert!(v.append(other).is_err());
    }

    #[test]
    fn test_search() {
        let v = floats(&[(10, 1.0), (20, 2.0), (30, 3.0)]);
        assert_eq!(v.search(5), 0);
        assert_eq!(v.search(20), 1);
        assert_eq!(v.search(25), 2);
        assert_eq!(v.search(35), 3);
    }
}
