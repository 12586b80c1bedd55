//! Per-acquisition lock tokens.

use rand::Rng;
use time::OffsetDateTime;

/// A cryptographically random value minted at lock acquisition time.
///
/// Held by the `Interceptor` for the duration of the critical section and
/// presented back to the lock backend on release; the backend only honours a
/// release whose token matches the one it handed out, so a holder whose TTL
/// already expired can never release a newer holder's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    value: String,
    minted_at: i64,
}

impl LockToken {
    /// Mints a new token: 128 bits of randomness plus the current second,
    /// hex-encoded so it is cheap to compare and to send over the wire.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 16] = rng.random();
        let minted_at = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            value: format!("{}-{:x}", minted_at, u128::from_be_bytes(bytes)),
            minted_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn minted_at(&self) -> i64 {
        self.minted_at
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        let a = LockToken::generate();
        let b = LockToken::generate();
        assert_ne!(a.as_str(), b.as_str());
    }
}
