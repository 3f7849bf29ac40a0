//! Bearer credential with client-side expiry introspection
//!
//! The access token is a JWT issued by the platform. The client never verifies
//! the signature; it only reads the `exp` claim so it can refresh ahead of time.

use crate::error::{CoreError, CoreResult};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-lived access credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Wrap a raw token, decoding its expiry when possible
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token).ok();
        Self { token, expires_at }
    }

    /// Raw bearer token
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Decoded expiry, `None` when the token carries no readable `exp` claim
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True when the expiry falls within `window` of `now`, or is unknown
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp - now <= window)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<Credential> for String {
    fn from(credential: Credential) -> Self {
        credential.token
    }
}

/// Read the `exp` claim out of a JWT payload without verifying it
pub fn decode_expiry(token: &str) -> CoreResult<DateTime<Utc>> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(CoreError::malformed_credential(
                "expected three dot-separated segments",
            ));
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| CoreError::malformed_credential(format!("payload is not base64url: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)?;

    let exp = claims
        .get("exp")
        .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64)))
        .ok_or_else(|| CoreError::malformed_credential("missing numeric exp claim"))?;

    Utc.timestamp_opt(exp, 0)
        .single()
        .ok_or_else(|| CoreError::malformed_credential(format!("exp {exp} out of range")))
}
