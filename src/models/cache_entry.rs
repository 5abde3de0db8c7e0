use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached response blob, served as a stale read while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, data: impl Into<Vec<u8>>, stored_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            stored_at,
        }
    }

    /// Decodes the blob as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_cache_entry_json() {
        let entry = CacheEntry::new("projects", br#"[{"id":1}]"#.to_vec(), Utc::now());
        let value: Value = entry.json().unwrap();
        assert_eq!(value, json!([{"id": 1}]));
    }

    #[test]
    fn test_cache_entry_invalid_json() {
        let entry = CacheEntry::new("raw", b"not json".to_vec(), Utc::now());
        assert!(entry.json::<Value>().is_err());
    }
}
