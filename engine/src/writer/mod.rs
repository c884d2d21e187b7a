//! Record writers.
//!
//! The import engine hands every accepted record to a [`RecordWriter`] along
//! with the vendor's [`ConflictPolicy`]. Conflicts are never errors: under
//! `ignore_on_conflict` a record whose natural key is already present is
//! reported as [`WriteOutcome::Ignored`].
//!
//! - [`MemoryWriter`] - tables held in memory, used by tests and `--dry-run`
//! - [`JsonLinesWriter`] - one `<table>.jsonl` file per table

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::WriteResult;
use crate::models::{ConflictPolicy, NormalizedRecord};

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// Natural key already present under `ignore_on_conflict`.
    Ignored,
}

/// Destination of normalized records.
pub trait RecordWriter {
    /// Declare the natural key columns of a table. Empty means the whole record.
    fn set_natural_key(&mut self, _table: &str, _columns: &[String]) {}

    /// Persist one record into `record.table`.
    fn write(&mut self, record: &NormalizedRecord, policy: ConflictPolicy) -> WriteResult<WriteOutcome>;

    fn flush(&mut self) -> WriteResult<()> {
        Ok(())
    }
}

/// Natural key of a record's JSON form.
///
/// With no key columns the full object is the key. Object keys serialize in
/// sorted order, so the same record always yields the same key.
pub fn natural_key(record: &Value, columns: &[String]) -> String {
    if columns.is_empty() {
        return record.to_string();
    }
    let values: Vec<&Value> = columns
        .iter()
        .map(|c| record.get(c.as_str()).unwrap_or(&Value::Null))
        .collect();
    serde_json::to_string(&values).unwrap_or_default()
}

/// Per-table key bookkeeping shared by the writers.
#[derive(Debug, Default)]
struct KeyIndex {
    columns: HashMap<String, Vec<String>>,
    seen: HashMap<String, HashSet<String>>,
}

impl KeyIndex {
    fn key_of(&self, table: &str, value: &Value) -> String {
        let columns = self.columns.get(table).map(Vec::as_slice).unwrap_or(&[]);
        natural_key(value, columns)
    }

    /// Record the key; false when it was already present.
    fn insert(&mut self, table: &str, key: String) -> bool {
        self.seen.entry(table.to_string()).or_default().insert(key)
    }

    fn contains(&self, table: &str, key: &str) -> bool {
        self.seen.get(table).is_some_and(|keys| keys.contains(key))
    }
}

// =============================================================================
// Memory Writer
// =============================================================================

/// Keeps every table in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    tables: HashMap<String, Vec<NormalizedRecord>>,
    keys: KeyIndex,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written to `table`, in write order.
    pub fn records(&self, table: &str) -> &[NormalizedRecord] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordWriter for MemoryWriter {
    fn set_natural_key(&mut self, table: &str, columns: &[String]) {
        self.keys.columns.insert(table.to_string(), columns.to_vec());
    }

    fn write(&mut self, record: &NormalizedRecord, policy: ConflictPolicy) -> WriteResult<WriteOutcome> {
        let key = self.keys.key_of(&record.table, &record.to_json());
        let fresh = self.keys.insert(&record.table, key);
        if policy == ConflictPolicy::IgnoreOnConflict && !fresh {
            return Ok(WriteOutcome::Ignored);
        }
        self.tables
            .entry(record.table.clone())
            .or_default()
            .push(record.clone());
        Ok(WriteOutcome::Inserted)
    }
}

// =============================================================================
// JSON Lines Writer
// =============================================================================

/// Appends records to `<dir>/<table>.jsonl`, one JSON object per line.
///
/// Before the first write to a table, an existing file is scanned so that
/// `ignore_on_conflict` also holds against earlier runs.
#[derive(Debug)]
pub struct JsonLinesWriter {
    dir: PathBuf,
    files: HashMap<String, BufWriter<File>>,
    keys: KeyIndex,
}

impl JsonLinesWriter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            files: HashMap::new(),
            keys: KeyIndex::default(),
        }
    }

    /// Path of the file backing `table`.
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table))
    }

    fn open(&mut self, table: &str) -> WriteResult<()> {
        if self.files.contains_key(table) {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.table_path(table);

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(&line)?;
                let key = self.keys.key_of(table, &value);
                self.keys.insert(table, key);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.files.insert(table.to_string(), BufWriter::new(file));
        Ok(())
    }
}

impl RecordWriter for JsonLinesWriter {
    fn set_natural_key(&mut self, table: &str, columns: &[String]) {
        self.keys.columns.insert(table.to_string(), columns.to_vec());
    }

    fn write(&mut self, record: &NormalizedRecord, policy: ConflictPolicy) -> WriteResult<WriteOutcome> {
        let table = record.table.as_str();
        self.open(table)?;

        let key = self.keys.key_of(table, &record.to_json());
        if policy == ConflictPolicy::IgnoreOnConflict && self.keys.contains(table, &key) {
            return Ok(WriteOutcome::Ignored);
        }
        self.keys.insert(table, key);

        let line = serde_json::to_string(record)?;
        if let Some(out) = self.files.get_mut(table) {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(WriteOutcome::Inserted)
    }

    fn flush(&mut self) -> WriteResult<()> {
        for out in self.files.values_mut() {
            out.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonLinesWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
