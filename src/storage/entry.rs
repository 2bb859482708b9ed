//! Stored Entry and its Codec
//!
//! An [`Entry`] is the unit both backends persist: the original key, the raw
//! value and an absolute expiration deadline. It is encoded as a small JSON
//! object:
//!
//! ```text
//! {"key":"session","value":"dG9rZW4xMjM=","expiration":1767225600000000000}
//! ```
//!
//! - `value` is base64 so arbitrary bytes survive the round trip.
//! - `expiration` is nanoseconds since the Unix epoch; `0` never expires.
//!
//! Expiration is lazy: an expired entry stays on disk (or in the table) until
//! it is overwritten or deleted, and every read path filters it out.

use crate::storage::{StorageError, StorageResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Expiration value meaning "never expires".
pub const NO_EXPIRATION: i64 = 0;

/// A stored key/value pair with its expiration deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The original key, kept so scans can recover it from hashed file names
    pub key: String,
    /// The stored payload
    #[serde(with = "base64_value")]
    pub value: Bytes,
    /// Absolute deadline in Unix nanoseconds (0 = never expires)
    #[serde(default)]
    pub expiration: i64,
}

impl Entry {
    /// Creates an entry, turning a relative TTL into an absolute deadline.
    pub fn new(key: impl Into<String>, value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            key: key.into(),
            value,
            expiration: ttl.map(deadline_after).unwrap_or(NO_EXPIRATION),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_nanos())
    }

    /// Checks expiry against an explicit clock reading.
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiration > NO_EXPIRATION && now > self.expiration
    }

    /// Serializes the entry to its on-disk form.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(StorageError::Encode)
    }

    /// Parses an entry from its on-disk form.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(bytes).map_err(StorageError::Decode)
    }
}

/// Current wall-clock time in Unix nanoseconds.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn deadline_after(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
    // A zero TTL must still produce a non-zero deadline, or it would read as "never"
    now_nanos().saturating_add(ttl).max(1)
}

mod base64_value {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        // Older snapshots may carry `null` for an empty value
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let entry = Entry::new("a key", Bytes::from("a value"), None);
        let encoded = entry.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&encoded).unwrap(),
            r#"{"key":"a key","value":"YSB2YWx1ZQ==","expiration":0}"#
        );
        assert_eq!(Entry::decode(&encoded).unwrap(), entry);
    }

    #[test]
    fn test_binary_value_survives() {
        let entry = Entry::new("bin", Bytes::from_static(&[0x00, 0xff, 0x10]), None);
        let decoded = Entry::decode(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded.value, Bytes::from_static(&[0x00, 0xff, 0x10]));
    }

    #[test]
    fn test_decode_tolerates_null_value_and_missing_expiration() {
        let decoded = Entry::decode(br#"{"key":"k","value":null}"#).unwrap();
        assert_eq!(decoded.key, "k");
        assert!(decoded.value.is_empty());
        assert_eq!(decoded.expiration, NO_EXPIRATION);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Entry::decode(b"not json"),
            Err(StorageError::Decode(_))
        ));
        assert!(matches!(
            Entry::decode(br#"{"key":"k","value":"!!!"}"#),
            Err(StorageError::Decode(_))
        ));
    }

    #[test]
    fn test_expiry() {
        let forever = Entry::new("k", Bytes::from("v"), None);
        assert!(!forever.is_expired());
        assert!(!forever.is_expired_at(i64::MAX));

        let entry = Entry::new("k", Bytes::from("v"), Some(Duration::from_secs(60)));
        assert!(entry.expiration > now_nanos());
        assert!(!entry.is_expired());
        assert!(!entry.is_expired_at(entry.expiration));
        assert!(entry.is_expired_at(entry.expiration + 1));
    }

    #[test]
    fn test_zero_ttl_expires() {
        let entry = Entry::new("k", Bytes::from("v"), Some(Duration::ZERO));
        assert_ne!(entry.expiration, NO_EXPIRATION);
        std::thread::sleep(Duration::from_millis(2));
        assert!(entry.is_expired());
    }
}
