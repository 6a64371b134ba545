//! Webhook signature verification
//!
//! HMAC-SHA256 with constant-time comparison (`Mac::verify_slice`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a timestamped signature
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Hex HMAC-SHA256 of `message` under `secret`
pub fn sign_hex(secret: &str, message: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex HMAC-SHA256 signature in constant time
pub fn verify_hex(secret: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let expected = hex::decode(signature_hex.trim())
        .map_err(|_| PaymentError::Signature("signature is not valid hex".into()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(message);
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::Signature("signature mismatch".into()))
}

/// Parsed `t=..,v1=..` (Stripe) or `ts=..,v1=..` (MercadoPago) header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    /// Every `v1` value; any one may match (secret rotation)
    pub signatures: Vec<String>,
}

impl TimestampedSignature {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key.trim() {
                "t" | "ts" => {
                    timestamp = Some(value.trim().parse::<i64>().map_err(|_| {
                        PaymentError::Signature("timestamp is not a number".into())
                    })?);
                }
                "v1" => signatures.push(value.trim().to_string()),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| PaymentError::Signature("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(PaymentError::Signature("missing v1 signature".into()));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }

    /// Reject timestamps further than the tolerance from `now` (unix seconds)
    pub fn check_freshness(&self, now: i64) -> Result<()> {
        if now.abs_diff(self.timestamp) > TIMESTAMP_TOLERANCE_SECS.unsigned_abs() {
            return Err(PaymentError::Signature(format!(
                "timestamp {} outside tolerance",
                self.timestamp
            )));
        }
        Ok(())
    }

    /// Accept if any `v1` value signs `message`
    pub fn verify(&self, secret: &str, message: &[u8]) -> Result<()> {
        for signature in &self.signatures {
            if verify_hex(secret, message, signature).is_ok() {
                return Ok(());
            }
        }
        Err(PaymentError::Signature("no matching v1 signature".into()))
    }
}

/// Verify a Stripe `stripe-signature` header over the raw body
pub fn verify_stripe(header: &str, payload: &str, secret: &str, now: i64) -> Result<()> {
    let parsed = TimestampedSignature::parse(header)?;
    parsed.check_freshness(now)?;
    let signed = format!("{}.{}", parsed.timestamp, payload);
    parsed.verify(secret, signed.as_bytes())
}

/// Verify a MercadoPago `x-signature` header.
///
/// The signed manifest is `id:{data.id};request-id:{x-request-id};ts:{ts};`.
pub fn verify_mercadopago(
    header: &str,
    data_id: &str,
    request_id: &str,
    secret: &str,
    now: i64,
) -> Result<()> {
    let parsed = TimestampedSignature::parse(header)?;
    // MercadoPago sends milliseconds
    let seconds = if parsed.timestamp > 10_000_000_000 {
        parsed.timestamp / 1000
    } else {
        parsed.timestamp
    };
    TimestampedSignature {
        timestamp: seconds,
        signatures: Vec::new(),
    }
    .check_freshness(now)?;

    let manifest = format!(
        "id:{};request-id:{};ts:{};",
        data_id.to_lowercase(),
        request_id,
        parsed.timestamp
    );
    parsed.verify(secret, manifest.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn test_stripe_signature_valid() {
        let payload = r#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let now = 1_700_000_000;
        let signature = sign_hex(SECRET, format!("{now}.{payload}").as_bytes()).unwrap();
        let header = format!("t={now},v1={signature}");

        assert!(verify_stripe(&header, payload, SECRET, now).is_ok());
    }

    #[test]
    fn test_stripe_signature_tampered_payload() {
        let payload = r#"{"amount":100}"#;
        let now = 1_700_000_000;
        let signature = sign_hex(SECRET, format!("{now}.{payload}").as_bytes()).unwrap();
        let header = format!("t={now},v1={signature}");

        let err = verify_stripe(&header, r#"{"amount":999}"#, SECRET, now).unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }

    #[test]
    fn test_stripe_signature_expired() {
        let payload = "{}";
        let signed_at = 1_700_000_000;
        let signature = sign_hex(SECRET, format!("{signed_at}.{payload}").as_bytes()).unwrap();
        let header = format!("t={signed_at},v1={signature}");

        // 10 minutes later
        let err = verify_stripe(&header, payload, SECRET, signed_at + 600).unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        let now = 1_700_000_000;
        for header in [
            format!("t={},v1=00", i64::MIN),
            format!("t={},v1=00", i64::MAX),
        ] {
            let err = verify_stripe(&header, "{}", SECRET, now).unwrap_err();
            assert!(matches!(err, PaymentError::Signature(_)));
        }

        let header = format!("ts={},v1=00", i64::MIN);
        let err = verify_mercadopago(&header, "1", "req-1", SECRET, now).unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }

    #[test]
    fn test_malformed_headers() {
        assert!(TimestampedSignature::parse("").is_err());
        assert!(TimestampedSignature::parse("garbage").is_err());
        assert!(TimestampedSignature::parse("v1=abc").is_err());
        assert!(TimestampedSignature::parse("t=123").is_err());
        assert!(TimestampedSignature::parse("t=abc,v1=00").is_err());
    }

    #[test]
    fn test_any_v1_may_match() {
        let payload = "{}";
        let now = 1_700_000_000;
        let good = sign_hex(SECRET, format!("{now}.{payload}").as_bytes()).unwrap();
        let header = format!("t={now},v1={},v1={good}", "00".repeat(32));

        assert!(verify_stripe(&header, payload, SECRET, now).is_ok());
    }

    #[test]
    fn test_mercadopago_manifest() {
        let ts_ms = 1_700_000_000_123_i64;
        let manifest = format!("id:123456;request-id:req-1;ts:{ts_ms};");
        let signature = sign_hex(SECRET, manifest.as_bytes()).unwrap();
        let header = format!("ts={ts_ms},v1={signature}");

        assert!(verify_mercadopago(&header, "123456", "req-1", SECRET, 1_700_000_000).is_ok());
        assert!(verify_mercadopago(&header, "999", "req-1", SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn test_verify_hex_rejects_non_hex() {
        let err = verify_hex(SECRET, b"body", "not-hex").unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }
}
