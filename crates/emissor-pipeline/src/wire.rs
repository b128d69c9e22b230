//! Payload envelope of the national submission API.
//!
//! Documents travel gzip-compressed and base64-encoded in both directions:
//! the signed DPS goes out as `dpsXmlGZipB64`, the issued NFS-e comes back
//! as `nfseXmlGZipB64`.

use std::io::{self, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Request field holding the signed DPS.
pub const REQUEST_FIELD: &str = "dpsXmlGZipB64";
/// Response field holding the issued NFS-e.
pub const ISSUED_FIELD: &str = "nfseXmlGZipB64";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid gzip: {0}")]
    Gzip(#[from] io::Error),
}

/// Gzip then base64 a document.
pub fn encode_document(xml: &[u8]) -> Result<String, WireError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml)?;
    Ok(STANDARD.encode(encoder.finish()?))
}

/// Inverse of [`encode_document`].
pub fn decode_document(encoded: &str) -> Result<Vec<u8>, WireError> {
    let compressed = STANDARD.decode(encoded.trim())?;
    let mut xml = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut xml)?;
    Ok(xml)
}

/// JSON request body for a signed document.
pub fn submission_body(signed: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut body = serde_json::Map::new();
    body.insert(REQUEST_FIELD.to_string(), encode_document(signed)?.into());
    Ok(serde_json::Value::Object(body).to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_only_the_compressed_document() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><DPS versao="1.00"/>"#;
        let body: serde_json::Value = serde_json::from_slice(&submission_body(xml).unwrap()).unwrap();
        let object = body.as_object().unwrap();
        assert_eq!(object.len(), 1);
        let encoded = object[REQUEST_FIELD].as_str().unwrap();
        assert!(!encoded.contains('<'));
        assert_eq!(decode_document(encoded).unwrap(), xml);
    }

    #[test]
    fn encoded_payload_is_gzip() {
        let raw = STANDARD.decode(encode_document(b"<NFSe/>").unwrap()).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(decode_document("not base64!"), Err(WireError::Base64(_))));
        let plain = STANDARD.encode(b"<NFSe/>");
        assert!(matches!(decode_document(&plain), Err(WireError::Gzip(_))));
    }
}
