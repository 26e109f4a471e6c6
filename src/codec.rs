//! Negotiation token codec.
//!
//! Turns a connection description into a compact opaque string and back:
//! JSON -> gzip -> base64 (URL-safe alphabet, no padding), so tokens survive
//! QR codes, URLs and clipboards without escaping. Pure functions, no side
//! effects; how the token travels is the host's business.

use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::peer::types::{Description, DescriptionKind, TokenPayload};

// Decompression cap, protects against zip-bombs
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024; // 256 KiB

/// Wire form of a token. The kind stays a plain string here so an
/// unrecognized value can be reported as `UnknownKind` rather than a generic
/// parse failure.
#[derive(Serialize, Deserialize)]
struct WirePayload {
    #[serde(rename = "type")]
    kind: String,
    sdp: String,
    id: String,
    ts: i64,
}

/// Encodes a payload into a transport-safe token.
pub fn encode(payload: &TokenPayload) -> String {
    let wire = WirePayload {
        kind: payload.description.kind.as_str().to_string(),
        sdp: payload.description.sdp.clone(),
        id: payload.id.clone(),
        ts: payload.ts,
    };

    // 1. JSON -> bytes
    let json = serde_json::to_vec(&wire).expect("serializing a token payload is infallible");

    // 2. GZIP compress
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json).expect("in-memory gzip write");
    let compressed = gz.finish().expect("in-memory gzip finish");

    // 3. base64, URL-safe alphabet
    general_purpose::URL_SAFE_NO_PAD.encode(compressed)
}

/// Decodes a token back into a payload. Inverse of [`encode`].
pub fn decode(token: &str) -> Result<TokenPayload, DecodeError> {
    // 1. base64 -> bytes
    let compressed = general_purpose::URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| DecodeError::Malformed)?;

    // 2. gunzip, capped
    let gz = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    let mut limited = gz.take(MAX_DECOMPRESSED_SIZE);
    limited
        .read_to_end(&mut json)
        .map_err(|_| DecodeError::Malformed)?;

    // 3. JSON -> struct
    let wire: WirePayload = serde_json::from_slice(&json).map_err(|_| DecodeError::Malformed)?;

    let kind = match wire.kind.as_str() {
        "offer" => DescriptionKind::Offer,
        "answer" => DescriptionKind::Answer,
        _ => return Err(DecodeError::UnknownKind),
    };

    Ok(TokenPayload {
        description: Description {
            kind,
            sdp: wire.sdp,
        },
        id: wire.id,
        ts: wire.ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(kind: DescriptionKind) -> TokenPayload {
        TokenPayload {
            description: Description {
                kind,
                sdp: "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n".into(),
            },
            id: "a1b2c3d4e5f60718".into(),
            ts: 1_726_000_000,
        }
    }

    #[test]
    fn offer_round_trips() {
        let p = payload(DescriptionKind::Offer);
        let token = encode(&p);
        assert_eq!(decode(&token).unwrap(), p);
    }

    #[test]
    fn answer_round_trips() {
        let p = payload(DescriptionKind::Answer);
        let token = encode(&p);
        assert_eq!(decode(&token).unwrap(), p);
    }

    #[test]
    fn token_alphabet_is_transport_safe() {
        let token = encode(&payload(DescriptionKind::Offer));
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(decode("not a token!!!"), Err(DecodeError::Malformed));
        // valid base64, not gzip
        let b64 = general_purpose::URL_SAFE_NO_PAD.encode(b"plain bytes");
        assert_eq!(decode(&b64), Err(DecodeError::Malformed));
        assert_eq!(decode(""), Err(DecodeError::Malformed));
    }

    #[test]
    fn unrecognized_kind_is_reported() {
        let wire = br#"{"type":"chat","sdp":"v=0","id":"00","ts":0}"#;
        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(wire).unwrap();
        let compressed = gz.finish().unwrap();
        let token = general_purpose::URL_SAFE_NO_PAD.encode(compressed);
        assert_eq!(decode(&token), Err(DecodeError::UnknownKind));
    }
}
