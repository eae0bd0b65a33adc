//! Read-only access to the hierarchical FAST5 container.
//!
//! Everything above this module navigates the container purely by building
//! slash-separated path strings; the backends own the actual lookup. The
//! in-memory backend in [`mem`] backs the test suite, the HDF5 backend in
//! `h5` (behind the `hdf5` cargo feature) reads real files.

use std::fmt;

use crate::Fast5Error;

pub mod mem;

#[cfg(feature = "hdf5")]
pub mod h5;

/// Attribute maps holding the per-run identity.
pub const TRACKING_PATH: &str = "UniqueGlobalKey/tracking_id";
/// Attribute maps holding the channel constants.
pub const CHANNEL_PATH: &str = "UniqueGlobalKey/channel_id";
/// Per-read raw signal groups.
pub const RAW_READS_PATH: &str = "Raw/Reads";
/// Per-read event-detection groups for the first analysis iteration.
pub const EVENT_READS_PATH: &str = "Analyses/EventDetection_000/Reads";
/// Root of all derived analyses, the subtree removed by stripping.
pub const ANALYSES_PATH: &str = "Analyses";

/// Path of the 1D basecall group for one analysis iteration.
pub fn basecall_1d(call_id: &str) -> String {
    format!("Analyses/Basecall_1D_{call_id}")
}

/// Path of the 2D basecall group for one analysis iteration.
pub fn basecall_2d(call_id: &str) -> String {
    format!("Analyses/Basecall_2D_{call_id}")
}

/// One scalar cell of an attribute map or dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Str(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

// Floats go through `{}` which renders the shortest string that parses back
// to the same f64, so no precision is lost in CSV output.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// A typed array dataset with named columns, e.g. an events table or the 2D
/// alignment table. Column order is the on-disk order and is preserved in
/// CSV output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl EventTable {
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of a named column, converted to integers. Missing column
    /// is an error; a non-numeric cell converts to the `-1` sentinel.
    pub fn int_column(&self, path: &str, name: &str) -> Result<Vec<i64>, Fast5Error> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| Fast5Error::MissingColumn {
                path: path.to_string(),
                column: name.to_string(),
            })?;
        Ok(self
            .rows
            .iter()
            .map(|row| row[idx].as_int().unwrap_or(-1))
            .collect())
    }

    /// All values of a named column as floats, non-numeric cells as NaN.
    pub fn float_column(&self, path: &str, name: &str) -> Result<Vec<f64>, Fast5Error> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| Fast5Error::MissingColumn {
                path: path.to_string(),
                column: name.to_string(),
            })?;
        Ok(self
            .rows
            .iter()
            .map(|row| row[idx].as_float().unwrap_or(f64::NAN))
            .collect())
    }
}

/// Read-only lookup into one open container.
///
/// Paths are slash-separated, a leading slash is tolerated. Lookups that
/// refer to an absent node report [`Fast5Error::MissingPath`]; callers that
/// treat absence as "feature not present" probe with [`Container::exists`]
/// first.
pub trait Container {
    /// Does a group or dataset exist at this path?
    fn exists(&self, path: &str) -> bool;

    /// A single attribute attached to the group or dataset at `path`.
    fn attr(&self, path: &str, name: &str) -> Option<Value>;

    /// Names of the direct children of a group, in lexical order.
    fn children(&self, path: &str) -> Vec<String>;

    /// A compound dataset as a column-named table.
    fn table(&self, path: &str) -> Result<EventTable, Fast5Error>;

    /// An unsigned 16-bit array dataset (the raw signal).
    fn signal(&self, path: &str) -> Result<Vec<u16>, Fast5Error>;

    /// A scalar string dataset (e.g. an embedded FASTQ record).
    fn text(&self, path: &str) -> Result<String, Fast5Error>;
}

pub(crate) fn norm(path: &str) -> &str {
    path.trim_matches('/')
}

/// Attribute as an integer. String attributes parse (channel numbers are
/// stored as strings in older files), floats truncate.
pub fn attr_int<C: Container + ?Sized>(c: &C, path: &str, name: &str) -> Option<i64> {
    match c.attr(path, name)? {
        Value::Int(v) => Some(v),
        Value::Float(v) => Some(v as i64),
        Value::Str(s) => s.trim().parse().ok(),
    }
}

/// Attribute as a float, parsing string attributes.
pub fn attr_float<C: Container + ?Sized>(c: &C, path: &str, name: &str) -> Option<f64> {
    match c.attr(path, name)? {
        Value::Int(v) => Some(v as f64),
        Value::Float(v) => Some(v),
        Value::Str(s) => s.trim().parse().ok(),
    }
}

/// Attribute rendered as a string.
pub fn attr_str<C: Container + ?Sized>(c: &C, path: &str, name: &str) -> Option<String> {
    c.attr(path, name).map(|v| v.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_render_full_precision() {
        let v = Value::Float(0.1234567890123456789);
        let parsed: f64 = v.to_string().parse().unwrap();
        assert_eq!(parsed, 0.1234567890123456789f64);
        assert_eq!(Value::Int(-1).to_string(), "-1");
        assert_eq!(Value::Str("GATTC".into()).to_string(), "GATTC");
    }

    #[test]
    fn test_basecall_paths() {
        assert_eq!(basecall_1d("000"), "Analyses/Basecall_1D_000");
        assert_eq!(basecall_2d("001"), "Analyses/Basecall_2D_001");
    }

    #[test]
    fn test_int_column() {
        let mut table = EventTable::new(vec!["template", "kmer"]);
        table.push_row(vec![Value::Int(3), Value::Str("ACGTA".into())]);
        table.push_row(vec![Value::Int(-1), Value::Str("CGTAC".into())]);
        assert_eq!(table.int_column("aln", "template").unwrap(), vec![3, -1]);
        assert!(table.int_column("aln", "missing").is_err());
    }
}
