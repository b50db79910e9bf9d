//! Bearer credential decoding: HS256 JWTs carrying the caller and their lab code.

use crate::error::TenantError;
use jsonwebtoken::{decode, get_current_timestamp, Algorithm, DecodingKey, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Clock skew tolerated when checking expiry.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Raw token payload. Every field is optional here so a missing field is reported as an
/// invalid credential rather than a generic decode failure. Timestamps are accepted under
/// the payload names (`issuedAt`, `expiresAt`) or the registered JWT names (`iat`, `exp`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub lab_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Expiry in seconds since the epoch, preferring `expiresAt`.
    pub fn expiry(&self) -> Option<i64> {
        self.expires_at.or(self.exp)
    }
}

/// Authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub lab_code: String,
}

fn lab_code_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").ok())
        .as_ref()
}

pub fn is_valid_lab_code(code: &str) -> bool {
    lab_code_pattern().is_some_and(|re| re.is_match(code))
}

impl TryFrom<Claims> for Identity {
    type Error = TenantError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        fn required(value: Option<String>, field: &str) -> Result<String, TenantError> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TenantError::InvalidCredential(format!("missing {}", field)))
        }
        let user_id = required(claims.user_id, "userId")?;
        let email = required(claims.email, "email")?;
        let display_name = required(claims.display_name, "displayName")?;
        let lab_code = required(claims.lab_code, "labCode")?;
        if !is_valid_lab_code(&lab_code) {
            return Err(TenantError::InvalidCredential("malformed labCode".into()));
        }
        Ok(Identity {
            user_id,
            email,
            display_name,
            lab_code,
        })
    }
}

/// Verifies bearer tokens against the shared HMAC secret.
#[derive(Clone)]
pub struct TokenDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl TokenDecoder {
    pub fn new(secret: &str) -> Self {
        // Expiry may arrive as `expiresAt`, which the library does not know; checked in `identity`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        TokenDecoder {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode `Authorization` header value (`Bearer <jwt>`) into an identity.
    pub fn identity_from_header(&self, header: Option<&str>) -> Result<Identity, TenantError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TenantError::InvalidCredential("missing bearer token".into()))?;
        self.identity(token)
    }

    pub fn identity(&self, token: &str) -> Result<Identity, TenantError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| TenantError::InvalidCredential(e.to_string()))?
            .claims;
        let expiry = claims
            .expiry()
            .ok_or_else(|| TenantError::InvalidCredential("missing expiresAt".into()))?;
        let now = i64::try_from(get_current_timestamp()).unwrap_or(i64::MAX);
        if expiry.saturating_add(EXPIRY_LEEWAY_SECS) < now {
            return Err(TenantError::InvalidCredential("credential expired".into()));
        }
        Identity::try_from(claims)
    }
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &str, claims: &Claims) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

#[cfg(test)]
pub(crate) fn claims_for(lab_code: Option<&str>) -> Claims {
    Claims {
        user_id: Some("u-1".into()),
        email: Some("tech@example.com".into()),
        display_name: Some("Lab Tech".into()),
        lab_code: lab_code.map(str::to_string),
        iat: Some(chrono::Utc::now().timestamp()),
        exp: Some(chrono::Utc::now().timestamp() + 3600),
        ..Claims::default()
    }
}
