//! Deterministic cache keys.
//!
//! Every cacheable unit of work is identified by a [`CacheKey`] rendered as
//! `{namespace}:{dataset_id}:{fingerprint}`. The fingerprint is a SHA-256 of
//! the dataset id, the schema version and the (normalized) question, so it is
//! identical across processes and restarts.
//!
//! # Normalization
//!
//! By default questions are trimmed, lowercased and have every whitespace run
//! collapsed to a single space before hashing, so `"total sales last month"`
//! and `"Total  Sales Last Month "` share a key. [`FingerprintKeyer::exact`]
//! skips normalization for callers that need exact-text sensitivity.

use crate::{DatasetId, KeyError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between the fields fed into the hash.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Version tag mixed into every fingerprint. Bump it to orphan all keys when
/// the hashing scheme changes.
const FINGERPRINT_VERSION: &[u8] = b"fp1";

// ============================================================================
// NAMESPACES
// ============================================================================

/// Cache tier a key belongs to. The namespace determines the TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// Question fingerprint to generated SQL.
    Translation,
    /// SQL plus dataset to tabular result.
    Result,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Translation, Namespace::Result];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Translation => "translation",
            Namespace::Result => "result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "translation" => Some(Namespace::Translation),
            "result" => Some(Namespace::Result),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CACHE KEY
// ============================================================================

/// Identity of a cacheable unit of work.
///
/// Construction goes through [`FingerprintKeyer`] or [`CacheKey::parse`], so a
/// key always carries a validated dataset id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    dataset_id: DatasetId,
    fingerprint: String,
}

impl CacheKey {
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn dataset_id(&self) -> &DatasetId {
        &self.dataset_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Render the key as stored in the backend.
    pub fn render(&self) -> String {
        format!(
            "{}:{}:{}",
            self.namespace.as_str(),
            self.dataset_id.as_str(),
            self.fingerprint
        )
    }

    /// Parse a rendered key back into its parts.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let malformed = |reason: &str| KeyError::MalformedKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = raw.splitn(3, ':');
        let namespace = parts
            .next()
            .and_then(Namespace::parse)
            .ok_or_else(|| malformed("unknown namespace"))?;
        let dataset_id = DatasetId::new(parts.next().ok_or_else(|| malformed("missing dataset"))?)?;
        let fingerprint = parts
            .next()
            .filter(|fp| !fp.is_empty() && fp.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| malformed("fingerprint must be hex"))?;

        Ok(Self {
            namespace,
            dataset_id,
            fingerprint: fingerprint.to_string(),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Prefix-scoped selection of keys, used for bulk deletes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    namespace: Namespace,
    prefix: String,
}

impl KeyPattern {
    /// Every key of one dataset within one namespace.
    pub fn dataset(namespace: Namespace, dataset_id: &DatasetId) -> Self {
        Self {
            namespace,
            prefix: format!("{}:{}:", namespace.as_str(), dataset_id.as_str()),
        }
    }

    /// Every key of one namespace.
    pub fn all(namespace: Namespace) -> Self {
        Self {
            namespace,
            prefix: format!("{}:", namespace.as_str()),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, rendered_key: &str) -> bool {
        rendered_key.starts_with(&self.prefix)
    }

    /// Glob form for backends that scan by pattern (`translation:7:*`).
    ///
    /// Dataset ids never contain glob metacharacters, so the prefix is safe to
    /// embed verbatim.
    pub fn as_glob(&self) -> String {
        format!("{}*", self.prefix)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_glob())
    }
}

// ============================================================================
// KEYER
// ============================================================================

/// How question text is treated before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMode {
    /// Trim, lowercase and collapse whitespace.
    #[default]
    Normalized,
    /// Hash the question exactly as given.
    Exact,
}

/// Computes deterministic cache keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintKeyer {
    mode: NormalizationMode,
}

impl FingerprintKeyer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyer that does not normalize question text.
    pub fn exact() -> Self {
        Self {
            mode: NormalizationMode::Exact,
        }
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    /// Trim, lowercase and collapse every whitespace run to one space.
    pub fn normalize_question(raw: &str) -> String {
        collapse_whitespace(raw).to_lowercase()
    }

    /// Translation-tier key for a question.
    pub fn fingerprint(
        &self,
        dataset_id: &DatasetId,
        raw_question: &str,
        schema_version: &str,
    ) -> CacheKey {
        let question = match self.mode {
            NormalizationMode::Normalized => Self::normalize_question(raw_question),
            NormalizationMode::Exact => raw_question.to_string(),
        };
        CacheKey {
            namespace: Namespace::Translation,
            dataset_id: dataset_id.clone(),
            fingerprint: digest(&[
                dataset_id.as_str().as_bytes(),
                schema_version.as_bytes(),
                question.as_bytes(),
            ]),
        }
    }

    /// Like [`fingerprint`](Self::fingerprint) but validates a raw dataset id.
    pub fn fingerprint_str(
        &self,
        dataset_id: &str,
        raw_question: &str,
        schema_version: &str,
    ) -> Result<CacheKey, KeyError> {
        let dataset_id = DatasetId::new(dataset_id)?;
        Ok(self.fingerprint(&dataset_id, raw_question, schema_version))
    }

    /// Result-tier key for a SQL statement.
    ///
    /// Only whitespace is collapsed; case is preserved because SQL string
    /// literals are case sensitive.
    pub fn result_key(&self, dataset_id: &DatasetId, sql: &str) -> CacheKey {
        let sql = collapse_whitespace(sql);
        CacheKey {
            namespace: Namespace::Result,
            dataset_id: dataset_id.clone(),
            fingerprint: digest(&[dataset_id.as_str().as_bytes(), sql.as_bytes()]),
        }
    }
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn digest(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION);
    for field in fields {
        hasher.update([FIELD_SEPARATOR]);
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_fingerprint_is_deterministic(
            dataset in "[A-Za-z0-9_-]{1,16}",
            question in ".{0,64}",
            version in "[a-z0-9.]{0,8}",
        ) {
            let dataset = DatasetId::new(dataset).unwrap();
            let a = FingerprintKeyer::new().fingerprint(&dataset, &question, &version);
            let b = FingerprintKeyer::new().fingerprint(&dataset, &question, &version);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_normalization_ignores_case_and_padding(
            words in proptest::collection::vec("[a-z]{1,8}", 1..6),
            pad in "[ \t\n]{0,3}",
        ) {
            let keyer = FingerprintKeyer::new();
            let dataset = DatasetId::from(1);
            let plain = words.join(" ");
            let noisy = format!("{pad}{}{pad}", words.join("  ").to_uppercase());
            prop_assert_eq!(
                keyer.fingerprint(&dataset, &plain, "v1"),
                keyer.fingerprint(&dataset, &noisy, "v1")
            );
        }

        #[test]
        fn prop_render_parse_inverse(
            dataset in "[A-Za-z0-9_-]{1,16}",
            question in ".{0,32}",
        ) {
            let dataset = DatasetId::new(dataset).unwrap();
            let key = FingerprintKeyer::new().fingerprint(&dataset, &question, "v1");
            prop_assert_eq!(CacheKey::parse(&key.render()).unwrap(), key);
        }
    }
}
