use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::headers::DeliveryHeaderNames;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac_for(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size")
}

/// HMAC-SHA256 of the exact payload bytes, hex encoded.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Value placed in the signature header: `sha256=<hex>`.
pub fn signature_header_value(secret: &[u8], payload: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, compute_signature(secret, payload))
}

/// Verify a received signature. Accepts the bare hex digest or the
/// `sha256=` prefixed header value. Comparison is constant time.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let hex_part = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Ok(signature) = hex::decode(hex_part.trim()) else {
        return false;
    };

    let mut mac = mac_for(secret);
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDelivery {
    pub event_type: Option<String>,
    pub delivery_id: Option<String>,
    pub signature: Option<String>,
}

/// Pull the delivery headers out of a received request, matching names
/// case-insensitively.
pub fn parse_delivery_headers<'a, I>(headers: I, names: &DeliveryHeaderNames) -> ParsedDelivery
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut parsed = ParsedDelivery::default();

    for (name, value) in headers {
        if name.eq_ignore_ascii_case(&names.event) {
            parsed.event_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(&names.delivery) {
            parsed.delivery_id = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(&names.signature) {
            parsed.signature = Some(value.to_string());
        }
    }

    parsed
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("signature header missing")]
    MissingSignature,
    #[error("event type header missing")]
    MissingEventType,
    #[error("signature does not match payload")]
    InvalidSignature,
}

/// Verify an incoming webhook request in one call.
pub fn verify_webhook_request<'a, I>(
    headers: I,
    payload: &[u8],
    secret: &[u8],
    names: &DeliveryHeaderNames,
) -> Result<ParsedDelivery, VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let parsed = parse_delivery_headers(headers, names);
    let signature = parsed.signature.as_deref().ok_or(VerificationError::MissingSignature)?;
    if parsed.event_type.is_none() {
        return Err(VerificationError::MissingEventType);
    }

    if verify_signature(secret, payload, signature) {
        Ok(parsed)
    } else {
        Err(VerificationError::InvalidSignature)
    }
}
