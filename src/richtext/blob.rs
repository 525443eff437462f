use sha2::{Digest, Sha256};
use thiserror::Error;

use super::styled::StyledText;

/// Leading bytes of every rich-text blob
pub const BLOB_MAGIC: &[u8; 4] = b"NDRT";

/// Current blob layout version
pub const BLOB_VERSION: u8 = 1;

const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = BLOB_MAGIC.len() + 1 + DIGEST_LEN;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob is empty")]
    Empty,

    #[error("Blob is truncated ({0} bytes)")]
    Truncated(usize),

    #[error("Blob magic mismatch")]
    BadMagic,

    #[error("Unsupported blob version {0}")]
    UnsupportedVersion(u8),

    #[error("Blob digest mismatch")]
    DigestMismatch,

    #[error("Blob decodes to empty text")]
    EmptyText,

    #[error("Blob payload invalid: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Serialize styled text as `magic | version | sha256(payload) | payload`
pub fn encode(text: &StyledText) -> Result<Vec<u8>, BlobError> {
    let payload = serde_json::to_vec(text)?;
    let digest = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(BLOB_MAGIC);
    out.push(BLOB_VERSION);
    out.extend_from_slice(&digest);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Validate and deserialize a blob. Text with no visible content is rejected.
pub fn decode(bytes: &[u8]) -> Result<StyledText, BlobError> {
    if bytes.is_empty() {
        return Err(BlobError::Empty);
    }
    if bytes.len() <= HEADER_LEN {
        return Err(BlobError::Truncated(bytes.len()));
    }

    let (magic, rest) = bytes.split_at(BLOB_MAGIC.len());
    if magic != BLOB_MAGIC {
        return Err(BlobError::BadMagic);
    }

    let version = rest[0];
    if version != BLOB_VERSION {
        return Err(BlobError::UnsupportedVersion(version));
    }

    let (digest, payload) = rest[1..].split_at(DIGEST_LEN);
    if Sha256::digest(payload).as_slice() != digest {
        return Err(BlobError::DigestMismatch);
    }

    let text: StyledText = serde_json::from_slice(payload)?;
    if text.is_empty() {
        return Err(BlobError::EmptyText);
    }
    Ok(text)
}

/// Cheap validity check used when carrying blobs across schema generations
pub fn is_valid(bytes: &[u8]) -> bool {
    decode(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::richtext::styled::{StyledLine, StyledSpan};

    fn sample() -> StyledText {
        StyledText {
            lines: vec![StyledLine {
                spans: vec![StyledSpan::plain("hello")],
            }],
        }
    }

    #[test]
    fn test_encode_decode() {
        let blob = encode(&sample()).unwrap();
        assert!(blob.starts_with(BLOB_MAGIC));
        assert_eq!(decode(&blob).unwrap(), sample());
    }

    #[test]
    fn test_rejects_empty_and_truncated() {
        assert!(matches!(decode(&[]), Err(BlobError::Empty)));
        assert!(matches!(decode(b"NDRT\x01"), Err(BlobError::Truncated(5))));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut blob = encode(&sample()).unwrap();
        blob[0] = b'X';
        assert!(matches!(decode(&blob), Err(BlobError::BadMagic)));
    }

    #[test]
    fn test_rejects_future_version() {
        let mut blob = encode(&sample()).unwrap();
        blob[4] = 9;
        assert!(matches!(decode(&blob), Err(BlobError::UnsupportedVersion(9))));
    }

    #[test]
    fn test_rejects_flipped_payload_byte() {
        let mut blob = encode(&sample()).unwrap();
        let last = blob.len() - 2;
        blob[last] ^= 0x20;
        assert!(matches!(decode(&blob), Err(BlobError::DigestMismatch)));
    }

    #[test]
    fn test_rejects_empty_text() {
        let blob = encode(&StyledText::default()).unwrap();
        assert!(matches!(decode(&blob), Err(BlobError::EmptyText)));
        assert!(!is_valid(&blob));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(!is_valid(b"this is not a blob at all, just some bytes that are long enough"));
    }
}
