//! Cache Key Codec
//!
//! Builds deterministic cache keys from a namespace, an owner id, and the
//! request parameters. Invalidation patterns are derived from the same
//! construction, so the lookup path and the invalidation path cannot drift.
//!
//! Storage form: `namespace:owner_id:fingerprint`, where the fingerprint is
//! the first 128 bits of a SHA-256 over the canonicalized parameters.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Fingerprint length in bytes (128 bits)
pub const FINGERPRINT_BYTES: usize = 16;

/// Segment separator in storage keys
pub const KEY_SEPARATOR: char = ':';

// =============================================================================
// Parameter Values
// =============================================================================

/// A primitive request parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl ParamValue {
    /// Append the canonical, type-tagged byte form of this value
    fn write_canonical(&self, name: &str, out: &mut Vec<u8>) -> Result<()> {
        match self {
            ParamValue::Bool(b) => {
                out.push(b'b');
                out.push(u8::from(*b));
            }
            ParamValue::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(&i.to_be_bytes());
            }
            ParamValue::Float(f) => {
                if !f.is_finite() {
                    return Err(Error::InvalidKey(format!(
                        "parameter '{}' is not a finite number",
                        name
                    )));
                }
                // -0.0 and 0.0 are the same request
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                out.push(b'f');
                out.extend_from_slice(&normalized.to_bits().to_be_bytes());
            }
            ParamValue::Text(s) => {
                out.push(b's');
                write_len_prefixed(out, s.as_bytes());
            }
            ParamValue::Date(d) => {
                out.push(b'd');
                out.extend_from_slice(&d.num_days_from_ce().to_be_bytes());
            }
            ParamValue::Timestamp(t) => {
                out.push(b't');
                out.extend_from_slice(&t.timestamp().to_be_bytes());
                out.extend_from_slice(&t.timestamp_subsec_nanos().to_be_bytes());
            }
        }
        Ok(())
    }
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(v: NaiveDate) -> Self {
        ParamValue::Date(v)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(v: DateTime<Utc>) -> Self {
        ParamValue::Timestamp(v)
    }
}

// =============================================================================
// Params
// =============================================================================

/// Request parameters, ordered by name
///
/// Insertion order never affects the fingerprint. Inserting the same name
/// twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Compute the 128-bit fingerprint (lowercase hex)
    pub fn fingerprint(&self) -> Result<String> {
        let mut canonical = Vec::with_capacity(self.0.len() * 32);
        for (name, value) in &self.0 {
            write_len_prefixed(&mut canonical, name.as_bytes());
            value.write_canonical(name, &mut canonical)?;
        }
        let digest = Sha256::digest(&canonical);
        Ok(hex::encode(&digest[..FINGERPRINT_BYTES]))
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Unique, deterministic identifier for a cached result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Namespace (e.g., "forecast")
    pub namespace: String,
    /// Owner the result belongs to
    pub owner_id: u64,
    /// Fingerprint of the request parameters
    pub fingerprint: String,
}

impl CacheKey {
    /// Build a key from its logical parts
    pub fn build(namespace: &str, owner_id: u64, params: &Params) -> Result<Self> {
        validate_namespace(namespace)?;
        Ok(Self {
            namespace: namespace.to_string(),
            owner_id,
            fingerprint: params.fingerprint()?,
        })
    }

    /// Get a string representation for storage
    pub fn to_storage_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.namespace,
            self.owner_id,
            self.fingerprint,
            sep = KEY_SEPARATOR
        )
    }

    /// Parse from storage key string
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, KEY_SEPARATOR);
        let namespace = parts.next()?;
        let owner_id = parts.next()?.parse().ok()?;
        let fingerprint = parts.next()?;

        if validate_namespace(namespace).is_err() || !is_fingerprint(fingerprint) {
            return None;
        }

        Some(Self {
            namespace: namespace.to_string(),
            owner_id,
            fingerprint: fingerprint.to_string(),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}

/// Namespaces are restricted to `[A-Za-z0-9_.-]` so they can never contain
/// the key separator, a glob metacharacter, or a path separator.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::InvalidKey("namespace must not be empty".into()));
    }
    let valid = namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid || namespace.starts_with('.') {
        return Err(Error::InvalidKey(format!(
            "namespace '{}' contains characters outside [A-Za-z0-9_.-]",
            namespace
        )));
    }
    Ok(())
}

fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_BYTES * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// =============================================================================
// Key Pattern
// =============================================================================

/// A set of keys selected for invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum KeyPattern {
    /// Every namespace under one owner (`*:owner:*`)
    Owner { owner_id: u64 },
    /// One namespace under one owner (`namespace:owner:*`)
    NamespaceOwner { namespace: String, owner_id: u64 },
}

impl KeyPattern {
    pub fn owner(owner_id: u64) -> Self {
        KeyPattern::Owner { owner_id }
    }

    pub fn namespace_owner(namespace: &str, owner_id: u64) -> Result<Self> {
        validate_namespace(namespace)?;
        Ok(KeyPattern::NamespaceOwner {
            namespace: namespace.to_string(),
            owner_id,
        })
    }

    pub fn owner_id(&self) -> u64 {
        match self {
            KeyPattern::Owner { owner_id } | KeyPattern::NamespaceOwner { owner_id, .. } => {
                *owner_id
            }
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            KeyPattern::Owner { .. } => None,
            KeyPattern::NamespaceOwner { namespace, .. } => Some(namespace),
        }
    }

    /// Render as a glob understood by key/value stores (Redis `SCAN MATCH`)
    pub fn to_glob(&self) -> String {
        match self {
            KeyPattern::Owner { owner_id } => {
                format!("*{sep}{}{sep}*", owner_id, sep = KEY_SEPARATOR)
            }
            KeyPattern::NamespaceOwner {
                namespace,
                owner_id,
            } => format!("{}{sep}{}{sep}*", namespace, owner_id, sep = KEY_SEPARATOR),
        }
    }

    /// Check whether a key falls under this pattern
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyPattern::Owner { owner_id } => key.owner_id == *owner_id,
            KeyPattern::NamespaceOwner {
                namespace,
                owner_id,
            } => key.owner_id == *owner_id && key.namespace == *namespace,
        }
    }

    /// Check whether a storage key string falls under this pattern
    pub fn matches_storage_key(&self, key: &str) -> bool {
        CacheKey::from_storage_key(key)
            .map(|k| self.matches(&k))
            .unwrap_or(false)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_glob())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = Params::new()
            .with("horizonDays", 90)
            .with("asOf", date(2024, 3, 1))
            .with("scenario", "baseline");
        let b = Params::new()
            .with("scenario", "baseline")
            .with("horizonDays", 90)
            .with("asOf", date(2024, 3, 1));

        let ka = CacheKey::build("forecast", 42, &a).unwrap();
        let kb = CacheKey::build("forecast", 42, &b).unwrap();
        assert_eq!(ka, kb);
        assert_eq!(ka.to_storage_key(), kb.to_storage_key());
    }

    #[test]
    fn test_distinct_params_distinct_keys() {
        let base = CacheKey::build("forecast", 42, &Params::new().with("horizonDays", 90)).unwrap();
        let other = CacheKey::build("forecast", 42, &Params::new().with("horizonDays", 30)).unwrap();
        let renamed = CacheKey::build("forecast", 42, &Params::new().with("horizon", 90)).unwrap();
        assert_ne!(base, other);
        assert_ne!(base, renamed);
    }

    #[test]
    fn test_value_types_are_distinguished() {
        let int = Params::new().with("n", 1).fingerprint().unwrap();
        let text = Params::new().with("n", "1").fingerprint().unwrap();
        let float = Params::new().with("n", 1.0).fingerprint().unwrap();
        assert_ne!(int, text);
        assert_ne!(int, float);
    }

    #[test]
    fn test_name_value_boundaries_do_not_collide() {
        let a = Params::new().with("ab", "c").fingerprint().unwrap();
        let b = Params::new().with("a", "bc").fingerprint().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = Params::new().fingerprint().unwrap();
        assert_eq!(fp.len(), FINGERPRINT_BYTES * 2);
        assert!(fp.bytes().all(|b| b.is_ascii_hexdigit()));

        let zero = Params::new().with("x", 0.0).fingerprint().unwrap();
        let neg_zero = Params::new().with("x", -0.0).fingerprint().unwrap();
        assert_eq!(zero, neg_zero);
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let params = Params::new().with("rate", f64::NAN);
        assert_matches!(CacheKey::build("forecast", 1, &params), Err(Error::InvalidKey(_)));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        for ns in ["", "fore:cast", "fore*cast", "a/b", "..", "with space"] {
            assert_matches!(
                CacheKey::build(ns, 1, &Params::new()),
                Err(Error::InvalidKey(_)),
                "namespace {:?} should be rejected",
                ns
            );
        }
    }

    #[test]
    fn test_storage_key_parse() {
        let key = CacheKey::build("forecast", 42, &Params::new().with("horizonDays", 90)).unwrap();
        let parsed = CacheKey::from_storage_key(&key.to_storage_key()).unwrap();
        assert_eq!(parsed, key);

        assert!(CacheKey::from_storage_key("forecast:42").is_none());
        assert!(CacheKey::from_storage_key("forecast:abc:0123").is_none());
        assert!(CacheKey::from_storage_key("forecast:42:not-hex").is_none());
    }

    #[test]
    fn test_patterns() {
        let params = Params::new().with("horizonDays", 90);
        let forecast_42 = CacheKey::build("forecast", 42, &params).unwrap();
        let budget_42 = CacheKey::build("budget", 42, &params).unwrap();
        let forecast_7 = CacheKey::build("forecast", 7, &params).unwrap();

        let owner = KeyPattern::owner(42);
        assert!(owner.matches(&forecast_42));
        assert!(owner.matches(&budget_42));
        assert!(!owner.matches(&forecast_7));
        assert_eq!(owner.to_glob(), "*:42:*");

        let ns = KeyPattern::namespace_owner("forecast", 42).unwrap();
        assert!(ns.matches(&forecast_42));
        assert!(!ns.matches(&budget_42));
        assert_eq!(ns.to_glob(), "forecast:42:*");
        assert_eq!(ns.namespace(), Some("forecast"));

        assert!(owner.matches_storage_key(&forecast_42.to_storage_key()));
        assert!(!owner.matches_storage_key("forecast:142:0123"));
        assert!(!owner.matches_storage_key("garbage"));
    }
}
