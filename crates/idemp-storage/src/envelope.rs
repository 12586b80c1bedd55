//! On-wire/on-disk encoding for a [`StoredRecord`]: a single version byte
//! followed by the JSON payload, optionally gzip-compressed. Readers dispatch
//! on the version byte instead of guessing whether a value is compressed.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use idemp_types::StoredRecord;

const VERSION_RAW: u8 = 0x00;
const VERSION_GZIP: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("empty value")]
    Empty,
    #[error("unknown envelope version byte: {0:#04x}")]
    UnknownVersion(u8),
    #[error("malformed envelope: {0}")]
    Codec(#[from] std::io::Error),
    #[error("malformed record json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `record`, gzip-compressing the JSON body when `compress` is set.
pub fn encode(record: &StoredRecord, compress: bool) -> Result<Vec<u8>, EnvelopeError> {
    let json = serde_json::to_vec(record)?;
    if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(VERSION_GZIP);
        out.extend_from_slice(&compressed);
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(json.len() + 1);
        out.push(VERSION_RAW);
        out.extend_from_slice(&json);
        Ok(out)
    }
}

/// Parses a `version_byte || payload` envelope back into a [`StoredRecord`].
pub fn decode(bytes: &[u8]) -> Result<StoredRecord, EnvelopeError> {
    let (version, payload) = bytes.split_first().ok_or(EnvelopeError::Empty)?;
    let json = match *version {
        VERSION_RAW => payload.to_vec(),
        VERSION_GZIP => {
            let mut decoder = GzDecoder::new(payload);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        }
        other => return Err(EnvelopeError::UnknownVersion(other)),
    };
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredRecord {
        let now = time::OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        StoredRecord::capture(201, b"{\"ok\":true}".to_vec(), vec![], now, 60)
    }

    #[test]
    fn round_trips_raw() {
        let record = sample();
        let bytes = encode(&record, false).unwrap();
        assert_eq!(bytes[0], VERSION_RAW);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.status, record.status);
        assert_eq!(decoded.body, record.body);
    }

    #[test]
    fn round_trips_gzip() {
        let record = sample();
        let bytes = encode(&record, true).unwrap();
        assert_eq!(bytes[0], VERSION_GZIP);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.status, record.status);
        assert_eq!(decoded.body, record.body);
    }

    #[test]
    fn rejects_unknown_version_byte() {
        let bytes = vec![0x7f, 1, 2, 3];
        assert!(matches!(decode(&bytes), Err(EnvelopeError::UnknownVersion(0x7f))));
    }

    #[test]
    fn rejects_empty_value() {
        assert!(matches!(decode(&[]), Err(EnvelopeError::Empty)));
    }
}
