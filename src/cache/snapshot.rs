// Cache value encoding and export/import snapshots

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use super::CacheCategory;
use crate::error::{Error, Result};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// How a value is held in memory
#[derive(Debug, Clone)]
pub enum StoredValue {
    Plain(Value),
    /// Gzip-compressed JSON bytes
    Compressed(Vec<u8>),
}

impl StoredValue {
    /// Decode back into a JSON value
    pub fn to_value(&self) -> std::io::Result<Value> {
        match self {
            StoredValue::Plain(value) => Ok(value.clone()),
            StoredValue::Compressed(bytes) => {
                let raw = decompress(bytes)?;
                serde_json::from_slice(&raw).map_err(std::io::Error::from)
            }
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, StoredValue::Compressed(_))
    }
}

/// Gzip a byte buffer
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate a gzip byte buffer
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Hit/miss/eviction counters carried across export/import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// One exported entry. Values are always exported uncompressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub key: String,
    pub value: Value,
    pub created_at: i64,
    pub access_count: u64,
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Full dump of the main cache, every category cache and the counters.
///
/// Entries are listed from least to most recently used so that importing
/// restores recency order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub exported_at: String,
    pub counters: CounterSnapshot,
    pub main: Vec<EntrySnapshot>,
    #[serde(default)]
    pub categories: BTreeMap<CacheCategory, Vec<EntrySnapshot>>,
}

impl CacheSnapshot {
    pub fn entry_count(&self) -> usize {
        self.main.len() + self.categories.values().map(Vec::len).sum::<usize>()
    }

    pub fn check_version(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot(format!(
                "Unsupported cache snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compress_roundtrip() {
        let data = "abcdefgh".repeat(512);
        let packed = compress(data.as_bytes()).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data.as_bytes());
    }

    #[test]
    fn test_stored_value_decodes_compressed_json() {
        let value = json!({"results": ["a", "b"], "count": 2});
        let packed = compress(&serde_json::to_vec(&value).unwrap()).unwrap();
        let stored = StoredValue::Compressed(packed);
        assert!(stored.is_compressed());
        assert_eq!(stored.to_value().unwrap(), value);
    }

    #[test]
    fn test_corrupt_compressed_value_is_an_error() {
        let stored = StoredValue::Compressed(vec![1, 2, 3, 4]);
        assert!(stored.to_value().is_err());
    }
}
