//! Access token issuance and validation, refresh token generation.
//!
//! Access tokens are HS256-signed JWTs carrying an ordered list of claims plus
//! the registered `aud`, `iss`, `iat` and `exp` claims. Refresh tokens are
//! opaque random strings; their expiry lives on the user record.
//!
//! Everything here is a pure function of its inputs, the settings and the
//! clock. Nothing is logged or persisted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde_json::{Map, Value};

/// Claim types used by the authentication endpoints.
pub mod claim_types {
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const JTI: &str = "jti";
    pub const ROLE: &str = "role";
}

/// Registered claims managed by the token layer itself.
const REGISTERED_CLAIMS: [&str; 5] = ["aud", "iss", "exp", "iat", "nbf"];

/// Access token validity used when the setting is absent or unparseable.
pub const DEFAULT_TOKEN_VALIDITY_MINUTES: f64 = 10.0;

/// Refresh token validity used when the setting is absent or unparseable.
pub const DEFAULT_REFRESH_TOKEN_VALIDITY_MINUTES: i64 = 60;

/// Number of random bytes in a refresh token (before base64).
pub const REFRESH_TOKEN_BYTES: usize = 128;

/// A single (type, value) claim about the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Claim {
    pub kind: String,
    pub value: String,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Token settings, mirroring the `Jwt:*` configuration keys.
///
/// Numeric values are kept as raw strings so that the parse-or-default rules
/// apply at the point of use.
#[derive(Debug, Clone, Default)]
pub struct JwtSettings {
    /// `Jwt:SecretKey`
    pub secret_key: Option<String>,
    /// `Jwt:TokenValidityInMinutes`
    pub token_validity_in_minutes: Option<String>,
    /// `Jwt:RefreshTokenValidityInMinutes`
    pub refresh_token_validity_in_minutes: Option<String>,
    /// `Jwt:ValidAudience`
    pub valid_audience: Option<String>,
    /// `Jwt:ValidIssuer`
    pub valid_issuer: Option<String>,
}

impl JwtSettings {
    /// Settings with only a secret key; everything else uses defaults.
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: Some(secret_key.into()),
            ..Self::default()
        }
    }

    pub fn with_token_validity(mut self, minutes: impl Into<String>) -> Self {
        self.token_validity_in_minutes = Some(minutes.into());
        self
    }

    pub fn with_refresh_token_validity(mut self, minutes: impl Into<String>) -> Self {
        self.refresh_token_validity_in_minutes = Some(minutes.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.valid_audience = Some(audience.into());
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.valid_issuer = Some(issuer.into());
        self
    }

    fn secret(&self) -> Result<&[u8], TokenError> {
        match self.secret_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key.as_bytes()),
            _ => Err(TokenError::Configuration("JWT secret key is missing or empty")),
        }
    }

    /// Access token lifetime. Fractional minutes are honored.
    pub fn token_validity(&self) -> TimeDelta {
        let minutes = self
            .token_validity_in_minutes
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|m| m.is_finite())
            .unwrap_or(DEFAULT_TOKEN_VALIDITY_MINUTES);

        TimeDelta::try_milliseconds((minutes * 60_000.0).round() as i64)
            .unwrap_or_else(|| TimeDelta::minutes(DEFAULT_TOKEN_VALIDITY_MINUTES as i64))
    }

    /// Refresh token lifetime (whole minutes).
    pub fn refresh_token_validity(&self) -> TimeDelta {
        let minutes = self
            .refresh_token_validity_in_minutes
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_REFRESH_TOKEN_VALIDITY_MINUTES);

        TimeDelta::try_minutes(minutes)
            .unwrap_or_else(|| TimeDelta::minutes(DEFAULT_REFRESH_TOKEN_VALIDITY_MINUTES))
    }
}

/// A signed access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Compact serialization (`header.payload.signature`)
    pub token: String,
    /// Issued at (whole seconds)
    pub issued_at: DateTime<Utc>,
    /// Expiration (whole seconds, matches the `exp` claim)
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

/// Claims recovered from a verified access token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsPrincipal {
    /// Principal claims (registered claims excluded). Claims sharing a type
    /// travel as one JSON array, so they come back grouped by type in the
    /// order each type first appeared.
    pub claims: Vec<Claim>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ClaimsPrincipal {
    /// First value of the given claim type.
    pub fn find_first(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.find_first(claim_types::NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.find_first(claim_types::EMAIL)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.claims
            .iter()
            .filter(|c| c.kind == claim_types::ROLE)
            .map(|c| c.value.as_str())
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles().any(|r| r.eq_ignore_ascii_case(role))
    }

    fn from_payload(payload: Map<String, Value>) -> Self {
        let mut principal = ClaimsPrincipal::default();

        for (kind, value) in payload {
            match kind.as_str() {
                "iss" => principal.issuer = value_as_string(&value),
                "aud" => principal.audience = first_string(&value),
                "exp" => principal.expires_at = value.as_i64().and_then(timestamp),
                "iat" => principal.issued_at = value.as_i64().and_then(timestamp),
                "nbf" => {}
                _ => match value {
                    Value::Array(items) => principal.claims.extend(
                        items
                            .iter()
                            .filter_map(value_as_string)
                            .map(|v| Claim::new(kind.as_str(), v)),
                    ),
                    other => {
                        if let Some(v) = value_as_string(&other) {
                            principal.claims.push(Claim::new(kind, v));
                        }
                    }
                },
            }
        }

        principal
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.first().and_then(value_as_string),
        other => value_as_string(other),
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Build the JWT payload. Claims sharing a type collapse into a JSON array,
/// keeping their relative order. Registered claims are set last and win.
fn build_payload(
    claims: &[Claim],
    settings: &JwtSettings,
    issued_at: i64,
    expires_at: i64,
) -> Map<String, Value> {
    let mut payload = Map::new();

    for claim in claims {
        if REGISTERED_CLAIMS.contains(&claim.kind.as_str()) {
            continue;
        }
        let value = Value::String(claim.value.clone());
        match payload.get_mut(&claim.kind) {
            None => {
                payload.insert(claim.kind.clone(), value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }

    if let Some(audience) = &settings.valid_audience {
        payload.insert("aud".into(), Value::String(audience.clone()));
    }
    if let Some(issuer) = &settings.valid_issuer {
        payload.insert("iss".into(), Value::String(issuer.clone()));
    }
    payload.insert("iat".into(), Value::from(issued_at));
    payload.insert("exp".into(), Value::from(expires_at));

    payload
}

/// Issue a signed access token carrying `claims`.
///
/// Fails with [`TokenError::Configuration`] before building anything when the
/// secret key is missing or empty.
pub fn generate_access_token(
    claims: &[Claim],
    settings: &JwtSettings,
) -> Result<AccessToken, TokenError> {
    let secret = settings.secret()?;

    let now = Utc::now();
    let expires = now
        .checked_add_signed(settings.token_validity())
        .ok_or(TokenError::Configuration("Token validity is out of range"))?;

    let issued_at = now.timestamp();
    let expires_at = expires.timestamp();
    let payload = build_payload(claims, settings, issued_at, expires_at);

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(secret),
    )
    .map_err(TokenError::Encoding)?;

    Ok(AccessToken {
        token,
        issued_at: timestamp(issued_at).unwrap_or(now),
        expires_at: timestamp(expires_at).unwrap_or(expires),
    })
}

/// Generate an opaque refresh token: 128 random bytes, base64 encoded.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Read the claims of a correctly signed access token, ignoring its lifetime.
///
/// Issuer and audience are not checked. The header must declare HS256.
pub fn get_principal_from_expired_token(
    token: &str,
    settings: &JwtSettings,
) -> Result<ClaimsPrincipal, TokenError> {
    let secret = settings.secret()?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode_principal(token, secret, &validation)
}

/// Validate a bearer access token: signature, HS256, lifetime (no leeway),
/// and issuer/audience when they are configured.
pub fn validate_access_token(
    token: &str,
    settings: &JwtSettings,
) -> Result<ClaimsPrincipal, TokenError> {
    let secret = settings.secret()?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    match &settings.valid_audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if let Some(issuer) = &settings.valid_issuer {
        validation.set_issuer(&[issuer]);
    }

    decode_principal(token, secret, &validation)
}

fn decode_principal(
    token: &str,
    secret: &[u8],
    validation: &Validation,
) -> Result<ClaimsPrincipal, TokenError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| TokenError::InvalidToken(e.to_string()))?;
    if header.alg != Algorithm::HS256 {
        return Err(TokenError::InvalidToken(format!(
            "Unexpected signing algorithm {:?}",
            header.alg
        )));
    }

    let data = jsonwebtoken::decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(secret),
        validation,
    )
    .map_err(|e| TokenError::InvalidToken(e.to_string()))?;

    Ok(ClaimsPrincipal::from_payload(data.claims))
}

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Required token configuration is missing or unusable
    #[error("Token configuration error: {0}")]
    Configuration(&'static str),
    /// Bad signature, malformed token, disallowed algorithm or failed claim checks
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    /// Error encoding the token
    #[error("Failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
}
