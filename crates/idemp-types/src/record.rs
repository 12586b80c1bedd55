//! The replay payload persisted against an idempotency key.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// An HTTP response header captured verbatim, minus hop-by-hop headers.
pub type HeaderPair = (String, String);

/// Hop-by-hop / host-controlled headers that are never captured or restored.
pub const STRIPPED_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// The captured response for a single idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<HeaderPair>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl StoredRecord {
    /// Captures a response at `now`, stripping host-controlled headers and
    /// computing `expires_at` from `ttl_secs`.
    pub fn capture(
        status: u16,
        body: Vec<u8>,
        headers: impl IntoIterator<Item = HeaderPair>,
        now: OffsetDateTime,
        ttl_secs: u64,
    ) -> Self {
        let created_at = now.unix_timestamp();
        let headers = headers
            .into_iter()
            .filter(|(name, _)| !STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .collect();
        Self {
            status,
            body,
            headers,
            created_at,
            expires_at: created_at + ttl_secs as i64,
        }
    }

    /// Whether this record is still authoritative for replay at `now`.
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() < self.expires_at
    }

    /// Whether `status` falls in the capturable range `[200, 399]`.
    pub fn capturable_status(status: u16) -> bool {
        (200..400).contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn capture_strips_hop_by_hop_headers() {
        let now = datetime!(2024-01-01 00:00:00 UTC);
        let record = StoredRecord::capture(
            201,
            b"{}".to_vec(),
            vec![
                ("Content-Length".into(), "2".into()),
                ("X-Custom".into(), "v".into()),
            ],
            now,
            60,
        );
        assert_eq!(record.headers, vec![("X-Custom".into(), "v".into())]);
        assert_eq!(record.expires_at, record.created_at + 60);
    }

    #[test]
    fn is_live_respects_expiry_boundary() {
        let now = datetime!(2024-01-01 00:00:00 UTC);
        let record = StoredRecord::capture(200, vec![], vec![], now, 1);
        assert!(record.is_live(now));
        let just_before_expiry = now + time::Duration::milliseconds(999);
        assert!(record.is_live(just_before_expiry));
        let at_expiry = now + time::Duration::seconds(1);
        assert!(!record.is_live(at_expiry));
    }

    #[test]
    fn capturable_status_boundaries() {
        assert!(StoredRecord::capturable_status(200));
        assert!(StoredRecord::capturable_status(399));
        assert!(!StoredRecord::capturable_status(400));
        assert!(!StoredRecord::capturable_status(199));
    }

    #[test]
    fn round_trips_through_json() {
        let now = datetime!(2024-01-01 00:00:00 UTC);
        let record = StoredRecord::capture(201, b"payload".to_vec(), vec![], now, 30);
        let json = serde_json::to_vec(&record).unwrap();
        let back: StoredRecord = serde_json::from_slice(&json).unwrap();
        assert_eq!(record, back);
    }
}
