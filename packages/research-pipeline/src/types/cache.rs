//! Content cache records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest TTL a cache entry may be given (ten years).
pub const MAX_CACHE_TTL_HOURS: u32 = 24 * 365 * 10;

/// One fetched URL. The URL is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub domain: String,
    /// HTTP status of the last successful exchange (200 or 304)
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub bytes: u64,
    pub ttl_expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub body: String,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.ttl_expires_at
    }

    pub fn content_hash(&self) -> String {
        hash_content(&self.body)
    }
}

/// Domain rollup derived from entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRollup {
    pub domain: String,
    pub entries: u64,
    pub last_fetched: Option<DateTime<Utc>>,
    pub total_bytes: u64,
    /// Fetch failures recorded against this domain
    pub errors: u64,
}

/// Outcome of a bulk domain refetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefetchSummary {
    pub domain: String,
    pub attempted: usize,
    pub refetched: usize,
    pub not_modified: usize,
    pub from_cache: usize,
    pub errors: usize,
}

/// Expiry for an entry stored at `from` with a TTL of `ttl_hours`.
///
/// `None` when the TTL exceeds [`MAX_CACHE_TTL_HOURS`] or the sum overflows.
pub fn ttl_expiry(from: DateTime<Utc>, ttl_hours: u32) -> Option<DateTime<Utc>> {
    if ttl_hours > MAX_CACHE_TTL_HOURS {
        return None;
    }
    chrono::Duration::try_hours(i64::from(ttl_hours)).and_then(|ttl| from.checked_add_signed(ttl))
}

/// Hex SHA-256 of a body.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry_bounds() {
        let now = Utc::now();
        assert_eq!(ttl_expiry(now, 0), Some(now));
        assert_eq!(
            ttl_expiry(now, 24),
            Some(now + chrono::Duration::hours(24))
        );
        assert!(ttl_expiry(now, MAX_CACHE_TTL_HOURS).is_some());
        assert!(ttl_expiry(now, MAX_CACHE_TTL_HOURS + 1).is_none());
        assert!(ttl_expiry(now, u32::MAX).is_none());
    }
}
