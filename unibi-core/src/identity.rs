//! Identity types for datasets and training jobs

use crate::KeyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Training job identifier using UUIDv7 for timestamp-sortable IDs.
pub type JobId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 JobId (timestamp-sortable).
pub fn new_job_id() -> JobId {
    Uuid::now_v7()
}

/// Maximum accepted length of a dataset id.
pub const MAX_DATASET_ID_LEN: usize = 128;

/// Identifier of a dataset.
///
/// Dataset ids become a segment of every cache key
/// (`{namespace}:{dataset_id}:{fingerprint}`) and of the bulk-delete pattern
/// used on invalidation, so they are restricted to `[A-Za-z0-9_-]`. A `:` or
/// a glob metacharacter would let one dataset's purge reach into another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(value: impl Into<String>) -> Result<Self, KeyError> {
        let value = value.into();
        if value.is_empty() {
            return Err(KeyError::InvalidDatasetId {
                value,
                reason: "must not be empty".to_string(),
            });
        }
        if value.len() > MAX_DATASET_ID_LEN {
            return Err(KeyError::InvalidDatasetId {
                reason: format!("longer than {} characters", MAX_DATASET_ID_LEN),
                value,
            });
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(KeyError::InvalidDatasetId {
                reason: format!("contains forbidden character {:?}", bad),
                value,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for DatasetId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<String> for DatasetId {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatasetId> for String {
    fn from(id: DatasetId) -> Self {
        id.0
    }
}

impl FromStr for DatasetId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for DatasetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_dataset_id() {
        let id = DatasetId::from(7);
        assert_eq!(id.as_str(), "7");
        assert_eq!(DatasetId::new("7").unwrap(), id);
    }

    #[test]
    fn test_rejects_separator_and_glob_characters() {
        for bad in ["", "a:b", "sales*", "q?", "x[1]", "with space"] {
            let err = DatasetId::new(bad).unwrap_err();
            assert!(matches!(err, KeyError::InvalidDatasetId { .. }), "{bad}");
        }
    }

    #[test]
    fn test_rejects_overlong_id() {
        let long = "a".repeat(MAX_DATASET_ID_LEN + 1);
        assert!(DatasetId::new(long).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: DatasetId = serde_json::from_str("\"sales_2024\"").unwrap();
        assert_eq!(ok.as_str(), "sales_2024");
        assert!(serde_json::from_str::<DatasetId>("\"a:b\"").is_err());
    }

    #[test]
    fn test_job_ids_are_v7() {
        let a = new_job_id();
        let b = new_job_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 7);
    }
}
