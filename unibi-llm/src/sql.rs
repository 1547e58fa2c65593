//! Cleaning of generated SQL.
//!
//! Model output often arrives wrapped in markdown fences or prefixed with an
//! `intermediate_sql:` marker. Everything is stripped and whitespace collapsed
//! before the SQL is cached or executed, so the result-tier key of a statement
//! does not depend on how the model happened to format it.

use once_cell::sync::Lazy;
use regex::Regex;
use unibi_core::ProviderError;

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```sql\s*").expect("Invalid fence regex"));
static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*").expect("Invalid fence regex"));
static INTERMEDIATE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)intermediate[_\s]?sql[:\s]*").expect("Invalid marker regex")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Strip markdown fences and markers, collapse whitespace.
pub fn clean_sql(raw: &str) -> String {
    let sql = FENCE_OPEN.replace_all(raw, "");
    let sql = FENCE.replace_all(&sql, "");
    let sql = INTERMEDIATE_MARKER.replace_all(&sql, "");
    WHITESPACE.replace_all(sql.trim(), " ").into_owned()
}

/// Clean generator output, rejecting responses that contain no SQL.
pub fn ensure_sql(raw: &str) -> Result<String, ProviderError> {
    let sql = clean_sql(raw);
    if sql.is_empty() {
        return Err(ProviderError::Generation {
            reason: "generator returned no SQL".to_string(),
        });
    }
    Ok(sql)
}
