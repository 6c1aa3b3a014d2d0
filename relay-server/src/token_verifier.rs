use crate::{errors::auth_error::AuthError, models::principal::Principal};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

/// Verifies HS256 tokens issued by the authentication service.
pub struct TokenVerifier {
    key: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        TokenVerifier { key: key.into() }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verifies `token` as of the unix timestamp `now`.
    ///
    /// The signature is checked before any claim is read.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Principal, AuthError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::Malformed);
        };

        let header = decode_json(header_b64)?;
        if header.get("alg").and_then(Value::as_str) != Some("HS256") {
            return Err(AuthError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .or(Err(AuthError::Malformed))?;

        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .or(Err(AuthError::InvalidSignature))?;

        let Value::Object(claims) = decode_json(payload_b64)? else {
            return Err(AuthError::Malformed);
        };

        let subject = match claims.get("sub").and_then(Value::as_str) {
            Some(subject) if !subject.is_empty() => subject.to_string(),
            _ => return Err(AuthError::Malformed),
        };

        let expires_at = claims
            .get("exp")
            .and_then(numeric_date)
            .ok_or(AuthError::Malformed)?;

        if now >= expires_at {
            return Err(AuthError::Expired);
        }

        if let Some(not_before) = claims.get("nbf").and_then(numeric_date)
            && now < not_before
        {
            return Err(AuthError::Expired);
        }

        Ok(Principal {
            subject,
            claims: flatten_claims(claims),
        })
    }

    /// Issues a token for `claims` signed with this verifier's key.
    pub fn sign(&self, claims: &Value) -> Result<String, AuthError> {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_b64 = URL_SAFE_NO_PAD.encode(claims.to_string());

        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{header_b64}.{payload_b64}.{signature_b64}"))
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        <HmacSha256 as Mac>::new_from_slice(&self.key).or(Err(AuthError::InvalidSignature))
    }
}

fn decode_json(segment: &str) -> Result<Value, AuthError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).or(Err(AuthError::Malformed))?;
    serde_json::from_slice(&bytes).or(Err(AuthError::Malformed))
}

/// Seconds since the epoch. Fractional dates are floored.
fn numeric_date(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|seconds| seconds.is_finite())
            .map(|seconds| seconds.floor() as i64)
    })
}

fn flatten_claims(claims: Map<String, Value>) -> HashMap<String, String> {
    claims
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(value) => (name, value),
            other => (name, other.to_string()),
        })
        .collect()
}
