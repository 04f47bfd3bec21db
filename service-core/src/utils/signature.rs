use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of a raw payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(payload);
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify a hex HMAC-SHA256 signature using constant-time comparison.
///
/// Hex case is ignored; an empty signature never verifies.
pub fn verify_payload(secret: &str, payload: &[u8], signature: &str) -> Result<bool, anyhow::Error> {
    let signature = signature.trim();
    if signature.is_empty() {
        return Ok(false);
    }

    let expected_signature = sign_payload(secret, payload)?;
    let provided = signature.to_ascii_lowercase();

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = provided.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
