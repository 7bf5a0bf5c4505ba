//! Webhook signature check.
//!
//! The provider signs `x-signature: ts=<ts>,v1=<hex>` where `v1` is
//! HMAC-SHA256 over `<data.id><x-request-id><ts>` keyed with the webhook
//! secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("malformed x-signature header")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

/// Extracts `(ts, v1)` from the header value.
fn parse_header(header: &str) -> Option<(&str, &str)> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ts" => ts = Some(value.trim()),
            "v1" => v1 = Some(value.trim()),
            _ => {}
        }
    }
    Some((ts?, v1?))
}

pub fn verify(
    secret: &str,
    signature_header: Option<&str>,
    request_id: Option<&str>,
    data_id: &str,
) -> Result<(), SignatureError> {
    let header = signature_header.ok_or(SignatureError::MissingHeader("x-signature"))?;
    let request_id = request_id.ok_or(SignatureError::MissingHeader("x-request-id"))?;
    let (ts, v1) = parse_header(header).ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(v1).map_err(|_| SignatureError::Malformed)?;

    let manifest = format!("{data_id}{request_id}{ts}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, manifest: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature() {
        let v1 = sign("s3cret", "123456req-11700000000");
        let header = format!("ts=1700000000,v1={v1}");
        assert_eq!(verify("s3cret", Some(&header), Some("req-1"), "123456"), Ok(()));
    }

    #[test]
    fn test_wrong_secret_or_payload() {
        let v1 = sign("s3cret", "123456req-11700000000");
        let header = format!("ts=1700000000,v1={v1}");
        assert_eq!(verify("other", Some(&header), Some("req-1"), "123456"), Err(SignatureError::Mismatch));
        assert_eq!(verify("s3cret", Some(&header), Some("req-1"), "654321"), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_header_shape() {
        assert_eq!(
            verify("k", None, Some("r"), "1"),
            Err(SignatureError::MissingHeader("x-signature"))
        );
        assert_eq!(verify("k", Some("v1=abcd"), Some("r"), "1"), Err(SignatureError::Malformed));
        assert_eq!(verify("k", Some("ts=1,v1=zz"), Some("r"), "1"), Err(SignatureError::Malformed));
    }

    #[test]
    fn test_header_whitespace_is_tolerated() {
        let v1 = sign("k", "99r1");
        let header = format!(" ts=1 , v1={v1} ");
        assert_eq!(verify("k", Some(&header), Some("r"), "99"), Ok(()));
    }

    #[test]
    fn test_missing_request_id_is_rejected() {
        let v1 = sign("k", "991");
        let header = format!("ts=1,v1={v1}");
        assert_eq!(
            verify("k", Some(&header), None, "99"),
            Err(SignatureError::MissingHeader("x-request-id"))
        );
    }
}
