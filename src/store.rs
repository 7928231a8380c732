// Mon Feb 2 2026 - Alex

use crate::error::HarnessError;
use ahash::AHashMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One keyed entry of a record store.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: String,
    pub data: Bytes,
}

/// Keyed storage with a forward sequential cursor.
///
/// `sequence` yields records in insertion order and returns `None` once the
/// set is exhausted; the exhausting call resets the cursor, so the next call
/// starts over from the first record.
pub trait RecordStore: Send {
    fn sequence(&mut self) -> Result<Option<Record>, HarnessError>;
    fn sequence_key(&mut self) -> Result<Option<String>, HarnessError>;
    fn read(&mut self, key: &str) -> Result<Bytes, HarnessError>;
    fn insert(&mut self, key: &str, data: &[u8]) -> Result<(), HarnessError>;
    fn count(&self) -> u64;
    fn pathname(&self) -> &Path;
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    offset: u64,
    len: u64,
}

const INDEX_FILE: &str = "index.jsonl";
const DATA_FILE: &str = "data.bin";

/// File-backed record store: an append-only data file plus a JSON-lines
/// index, one directory per store. Millions of records stay two files.
/// Stores opened with [`FileRecordStore::open`] carry no index handle and
/// reject inserts.
pub struct FileRecordStore {
    path: PathBuf,
    entries: Vec<IndexEntry>,
    by_key: AHashMap<String, usize>,
    data: File,
    index: Option<File>,
    cursor: usize,
}

impl FileRecordStore {
    /// Create an empty store at `path`. Fails if the directory exists.
    pub fn create(path: &Path) -> Result<Self, HarnessError> {
        std::fs::create_dir_all(path)?;
        let data = OpenOptions::new()
            .create_new(true)
            .read(true)
            .append(true)
            .open(path.join(DATA_FILE))?;
        let index = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path.join(INDEX_FILE))?;

        Ok(Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            by_key: AHashMap::new(),
            data,
            index: Some(index),
            cursor: 0,
        })
    }

    /// Open an existing store read-only.
    pub fn open(path: &Path) -> Result<Self, HarnessError> {
        let index_path = path.join(INDEX_FILE);
        let reader = BufReader::new(File::open(&index_path).map_err(|e| {
            HarnessError::Storage(format!("could not open {}: {}", index_path.display(), e))
        })?);

        let mut entries = Vec::new();
        let mut by_key = AHashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry: IndexEntry = serde_json::from_str(&line).map_err(|e| {
                HarnessError::Storage(format!("corrupt index in {}: {}", path.display(), e))
            })?;
            by_key.insert(entry.key.clone(), entries.len());
            entries.push(entry);
        }

        let data = File::open(path.join(DATA_FILE))?;

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            by_key,
            data,
            index: None,
            cursor: 0,
        })
    }

    fn read_at(&mut self, offset: u64, len: u64) -> Result<Bytes, HarnessError> {
        let mut buf = vec![0u8; len as usize];
        self.data.seek(SeekFrom::Start(offset))?;
        self.data.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl RecordStore for FileRecordStore {
    fn sequence(&mut self) -> Result<Option<Record>, HarnessError> {
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
            return Ok(None);
        }
        let (key, offset, len) = {
            let entry = &self.entries[self.cursor];
            (entry.key.clone(), entry.offset, entry.len)
        };
        self.cursor += 1;
        let data = self.read_at(offset, len)?;
        Ok(Some(Record { key, data }))
    }

    fn sequence_key(&mut self) -> Result<Option<String>, HarnessError> {
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
            return Ok(None);
        }
        let key = self.entries[self.cursor].key.clone();
        self.cursor += 1;
        Ok(Some(key))
    }

    fn read(&mut self, key: &str) -> Result<Bytes, HarnessError> {
        let (offset, len) = match self.by_key.get(key) {
            Some(&i) => (self.entries[i].offset, self.entries[i].len),
            None => {
                return Err(HarnessError::Storage(format!(
                    "no record \"{}\" in {}",
                    key,
                    self.path.display()
                )))
            }
        };
        self.read_at(offset, len)
    }

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<(), HarnessError> {
        if self.by_key.contains_key(key) {
            return Err(HarnessError::Storage(format!(
                "duplicate key \"{}\" in {}",
                key,
                self.path.display()
            )));
        }
        let index = match self.index.as_mut() {
            Some(index) => index,
            None => {
                return Err(HarnessError::Storage(format!(
                    "{} is open read-only",
                    self.path.display()
                )))
            }
        };

        let offset = self.data.seek(SeekFrom::End(0))?;
        self.data.write_all(data)?;

        let entry = IndexEntry {
            key: key.to_string(),
            offset,
            len: data.len() as u64,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| HarnessError::Storage(format!("could not encode index entry: {}", e)))?;
        writeln!(index, "{}", line)?;

        self.by_key.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    fn pathname(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(keys: &[&str]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rs");
        let mut store = FileRecordStore::create(&path).unwrap();
        for key in keys {
            store.insert(key, key.as_bytes()).unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_insert_and_read() {
        let (_dir, path) = store_with(&["a", "b"]);
        let mut store = FileRecordStore::open(&path).unwrap();

        assert_eq!(store.count(), 2);
        assert_eq!(store.read("b").unwrap().as_ref(), b"b");
        assert!(store.read("c").is_err());
    }

    #[test]
    fn test_sequence_order_and_wrap() {
        let (_dir, path) = store_with(&["a", "b", "c"]);
        let mut store = FileRecordStore::open(&path).unwrap();

        let keys: Vec<String> = std::iter::from_fn(|| store.sequence_key().unwrap()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        // Exhaustion reset the cursor
        assert_eq!(store.sequence().unwrap().unwrap().key, "a");
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = FileRecordStore::create(&dir.path().join("rs")).unwrap();
        store.insert("a", b"1").unwrap();
        assert!(store.insert("a", b"2").is_err());
    }

    #[test]
    fn test_open_is_read_only() {
        let (_dir, path) = store_with(&["a"]);
        let mut store = FileRecordStore::open(&path).unwrap();
        assert!(store.insert("b", b"2").is_err());
    }

    #[test]
    fn test_create_refuses_existing() {
        let (_dir, path) = store_with(&["a"]);
        assert!(FileRecordStore::create(&path).is_err());
    }
}
