//! Unverified reads of a bearer token's payload.
//!
//! Tokens are `header.payload.signature`, each segment base64url. Only the
//! payload is interpreted here and the signature is never checked; that is
//! the backend's job. Nothing in this module fails loudly: a token that
//! cannot be decoded has unknown expiry and is treated as already expired.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Default "expiring soon" window, in seconds
pub const EXPIRING_SOON_SECS: u64 = 300;

/// base64url that accepts payloads with or without `=` padding
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry, seconds since the epoch
    #[serde(default, deserialize_with = "lenient_epoch")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Subject as text, whether the issuer encoded it as a string or a number
    pub fn subject(&self) -> Option<String> {
        match self.sub.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Subject interpreted as a numeric user id
    pub fn user_id(&self) -> Option<i64> {
        self.subject()?.trim().parse().ok()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp?, 0).single()
    }
}

/// Accept integer or fractional epoch seconds; anything else is "no expiry"
fn lenient_epoch<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))))
}

/// Decode the payload segment. Returns `None` on any malformation.
pub fn decode(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = match PAYLOAD_ENGINE.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Token payload is not base64url");
            return None;
        }
    };
    let text = String::from_utf8(bytes).ok()?;
    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Token payload is not JSON");
            return None;
        }
    };
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode(token).and_then(|c| c.exp) {
        Some(exp) => exp < now.timestamp(),
        None => true,
    }
}

pub fn seconds_until_expiry(token: &str) -> u64 {
    seconds_until_expiry_at(token, Utc::now())
}

/// `max(0, exp - now)`; 0 when the expiry is unknown
pub fn seconds_until_expiry_at(token: &str, now: DateTime<Utc>) -> u64 {
    decode(token)
        .and_then(|c| c.exp)
        .map(|exp| exp.saturating_sub(now.timestamp()).max(0) as u64)
        .unwrap_or(0)
}

pub fn expiration_instant(token: &str) -> Option<DateTime<Utc>> {
    decode(token)?.expiration()
}

pub fn will_expire_within(token: &str, threshold_secs: u64) -> bool {
    will_expire_within_at(token, threshold_secs, Utc::now())
}

/// True iff `0 < seconds_until_expiry <= threshold`.
///
/// An already-expired token is not "expiring soon"; check [`is_expired_at`].
pub fn will_expire_within_at(token: &str, threshold_secs: u64, now: DateTime<Utc>) -> bool {
    let remaining = seconds_until_expiry_at(token, now);
    remaining > 0 && remaining <= threshold_secs
}

/// Point-in-time summary of a token's lifetime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenInfo {
    pub is_valid: bool,
    pub expires_in: u64,
    pub expiration: Option<DateTime<Utc>>,
    pub will_expire_soon: bool,
}

pub fn token_info(token: &str) -> TokenInfo {
    token_info_at(token, Utc::now())
}

pub fn token_info_at(token: &str, now: DateTime<Utc>) -> TokenInfo {
    TokenInfo {
        is_valid: !is_expired_at(token, now),
        expires_in: seconds_until_expiry_at(token, now),
        expiration: expiration_instant(token),
        will_expire_soon: will_expire_within_at(token, EXPIRING_SOON_SECS, now),
    }
}
