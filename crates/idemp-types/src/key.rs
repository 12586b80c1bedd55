//! Validation, normalization, and generation of client-supplied idempotency
//! keys.
//!
//! Keys are opaque to the handler: the server never inspects or routes on
//! their content beyond the syntactic checks below.

use std::fmt;

use once_cell_regex::KEY_PATTERN;
use uuid::Uuid;

const MIN_LEN: usize = 1;
const MAX_LEN: usize = 255;

/// Validation failures for a raw idempotency key string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidationError {
    /// The key was empty (after trimming).
    Empty,
    /// The key exceeded [`MAX_LEN`] bytes.
    TooLong(usize),
    /// The key contained a character outside `[A-Za-z0-9_.-]`.
    InvalidCharacters,
    /// The key had the canonical UUID shape but did not parse as one.
    MalformedUuid,
}

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "idempotency key must not be empty"),
            Self::TooLong(len) => write!(f, "idempotency key is {len} bytes, max is {MAX_LEN}"),
            Self::InvalidCharacters => {
                write!(f, "idempotency key must match [A-Za-z0-9_.-]")
            }
            Self::MalformedUuid => write!(f, "idempotency key looks like a UUID but is not one"),
        }
    }
}

impl std::error::Error for KeyValidationError {}

/// A validated, normalized idempotency key.
///
/// Construct with [`IdempotencyKey::parse`]; the inner string is already
/// normalized (trimmed, lower-cased if UUID-shaped), so every call site sees
/// the same representation for a given client key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Normalizes and validates `raw`, returning the canonical key on success.
    pub fn parse(raw: &str) -> Result<Self, KeyValidationError> {
        let normalized = normalize(raw);
        validate(&normalized)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Produces a fresh random key in canonical UUID form.
    pub fn generate() -> Self {
        Self(generate())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = KeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Checks that `key` is already normalized and well-formed.
///
/// Most callers should go through [`IdempotencyKey::parse`], which
/// normalizes first; this is exposed for callers (and tests) that need to
/// validate without allocating a new `IdempotencyKey`.
pub fn validate(key: &str) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Err(KeyValidationError::Empty);
    }
    let len = key.len();
    if len < MIN_LEN || len > MAX_LEN {
        return Err(KeyValidationError::TooLong(len));
    }
    if !KEY_PATTERN.is_match(key) {
        return Err(KeyValidationError::InvalidCharacters);
    }
    if looks_like_uuid(key) && Uuid::parse_str(key).is_err() {
        return Err(KeyValidationError::MalformedUuid);
    }
    Ok(())
}

/// Trims whitespace and lower-cases the key when it has the canonical
/// 8-4-4-4-12 UUID shape. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(key: &str) -> String {
    let trimmed = key.trim();
    if looks_like_uuid(trimmed) {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Generates a fresh canonical-form UUID v4 string.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

fn looks_like_uuid(key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    let dash_positions = [8, 13, 18, 23];
    for (idx, byte) in bytes.iter().enumerate() {
        let expect_dash = dash_positions.contains(&idx);
        if expect_dash {
            if *byte != b'-' {
                return false;
            }
        } else if !byte.is_ascii_hexdigit() {
            return false;
        }
    }
    true
}

/// Indirection so the regex is compiled once per process regardless of how
/// many [`IdempotencyKey`] values are parsed.
mod once_cell_regex {
    use once_cell::sync::Lazy;
    use regex::Regex;

    pub static KEY_PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static pattern compiles"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert_eq!(validate(""), Err(KeyValidationError::Empty));
    }

    #[test]
    fn accepts_boundary_lengths() {
        let min = "a";
        assert!(validate(min).is_ok());
        let max = "a".repeat(255);
        assert!(validate(&max).is_ok());
        let over = "a".repeat(256);
        assert_eq!(validate(&over), Err(KeyValidationError::TooLong(256)));
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert_eq!(
            validate("has space"),
            Err(KeyValidationError::InvalidCharacters)
        );
        assert_eq!(
            validate("has/slash"),
            Err(KeyValidationError::InvalidCharacters)
        );
    }

    #[test]
    fn uuid_shaped_keys_normalize_to_lowercase_and_validate() {
        let upper = "A1B2C3D4-E5F6-47A8-89AB-CDEF01234567";
        let normalized = normalize(upper);
        assert_eq!(normalized, upper.to_ascii_lowercase());
        assert!(validate(&normalized).is_ok());
    }

    #[test]
    fn uuid_shaped_but_invalid_is_rejected() {
        // Right shape, wrong hex digit ('g') in the version position.
        let fake = "gggggggg-gggg-gggg-gggg-gggggggggggg";
        assert_eq!(validate(fake), Err(KeyValidationError::MalformedUuid));
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = "  A1B2C3D4-E5F6-47A8-89AB-CDEF01234567  ";
        let once = normalize(raw);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn validate_after_normalize_matches_validate_of_normalized() {
        let raw = "  plain-key_123.ok  ";
        let normalized = normalize(raw);
        assert_eq!(validate(&normalized), validate(&normalize(&normalized)));
    }

    #[test]
    fn generate_produces_parseable_key() {
        let key = IdempotencyKey::generate();
        assert!(validate(key.as_str()).is_ok());
    }

    #[test]
    fn parse_trims_and_validates() {
        let key = IdempotencyKey::parse("  order-42  ").expect("valid key");
        assert_eq!(key.as_str(), "order-42");
    }
}
