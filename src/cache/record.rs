//! Cache Records
//!
//! The payload stored in both tiers: an opaque serialized value plus the
//! timestamps needed to enforce expiry.

use crate::cache::key::CacheKey;
use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A computed result as stored in a cache tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Key the record is stored under
    pub key: CacheKey,
    /// Serialized result
    pub value: serde_json::Value,
    /// When the underlying computation finished
    pub computed_at: DateTime<Utc>,
    /// When the record stops being servable (None = never)
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheRecord {
    /// Create a record computed now
    pub fn new(key: CacheKey, value: serde_json::Value, ttl: Option<Duration>) -> Self {
        let computed_at = Utc::now();
        Self {
            key,
            value,
            computed_at,
            expires_at: ttl.map(|ttl| expiry_from(computed_at, ttl)),
        }
    }

    /// Serialize a typed value into a record
    ///
    /// Fails unless the stored form decodes back into `T`. JSON has no
    /// encoding for non-finite floats, which serialize as `null`.
    pub fn from_value<T>(key: CacheKey, value: &T, ttl: Option<Duration>) -> Result<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        let json = serde_json::to_value(value)?;
        serde_json::from_value::<T>(json.clone())?;
        Ok(Self::new(key, json, ttl))
    }

    /// Decode the stored value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    /// Check if the record is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Check if the record is past its expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry (None = never expires, zero = expired)
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at.map(|exp| {
            exp.signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Copy of this record re-stamped with a new expiry, keeping `computed_at`
    ///
    /// The new expiry never extends past the current one.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        let proposed = expiry_from(Utc::now(), ttl);
        let expires_at = match self.expires_at {
            Some(current) if current < proposed => current,
            _ => proposed,
        };
        Self {
            expires_at: Some(expires_at),
            ..self.clone()
        }
    }

    /// Encode for a byte-oriented store
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode from a byte-oriented store
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn expiry_from(start: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::Params;
    use serde_json::json;

    fn key() -> CacheKey {
        CacheKey::build("forecast", 42, &Params::new().with("horizonDays", 90)).unwrap()
    }

    #[test]
    fn test_expiry() {
        let record = CacheRecord::new(key(), json!({"balance": 10}), Some(Duration::from_secs(60)));
        assert!(!record.is_expired());
        assert!(record.is_expired_at(record.computed_at + chrono::Duration::seconds(60)));
        assert!(record.remaining_ttl().unwrap() <= Duration::from_secs(60));

        let forever = CacheRecord::new(key(), json!(null), None);
        assert!(!forever.is_expired_at(DateTime::<Utc>::MAX_UTC));
        assert_eq!(forever.remaining_ttl(), None);
    }

    #[test]
    fn test_with_ttl_never_extends() {
        let record = CacheRecord::new(key(), json!(1), Some(Duration::from_secs(30)));
        let longer = record.with_ttl(Duration::from_secs(3600));
        assert_eq!(longer.expires_at, record.expires_at);
        assert_eq!(longer.computed_at, record.computed_at);

        let shorter = record.with_ttl(Duration::from_secs(5));
        assert!(shorter.expires_at < record.expires_at);

        let unbounded = CacheRecord::new(key(), json!(1), None).with_ttl(Duration::from_secs(5));
        assert!(unbounded.expires_at.is_some());
    }

    #[test]
    fn test_typed_value() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Forecast {
            points: Vec<i64>,
        }

        let forecast = Forecast { points: vec![1, 2, 3] };
        let record = CacheRecord::from_value(key(), &forecast, None).unwrap();
        assert_eq!(record.decode::<Forecast>().unwrap(), forecast);
        assert!(record.decode::<String>().is_err());

        let bytes = record.to_bytes().unwrap();
        assert_eq!(CacheRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_non_finite_value_rejected() {
        assert!(CacheRecord::from_value(key(), &f64::NAN, None).is_err());
        assert!(CacheRecord::from_value(key(), &vec![1.0, f64::INFINITY], None).is_err());
    }
}
