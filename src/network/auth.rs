//! JWT Authentication
//!
//! Validates operator tokens from an external auth provider before a
//! connection may commit or reveal. The server does NOT issue tokens.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::protocol::ErrorCode;

/// How operator tokens are checked.
///
/// Exactly one key is used: the RSA public key when present, otherwise the
/// shared secret. With neither, the server has no operators and
/// `auth` requests are answered with a failure.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss`; unset accepts tokens from any provider.
    pub issuer: Option<String>,
    /// Required `aud`; unset skips the audience check.
    pub audience: Option<String>,
    /// PEM public key for RS256 operator tokens.
    pub public_key_pem: Option<String>,
    /// Shared secret for HS256 operator tokens.
    pub secret: Option<String>,
    /// Accept expired tokens. Local setups only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Can any operator token ever validate?
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Operator token payload.
///
/// Only `sub` matters to the ledger: it becomes the `committer` of every
/// game the connection commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Operator identity.
    pub sub: String,
    /// Unix seconds after which the operator must re-authenticate; 0 = never.
    #[serde(default)]
    pub exp: u64,
    /// Issue time, informational.
    #[serde(default)]
    pub iat: u64,
    /// Identity provider.
    #[serde(default)]
    pub iss: Option<String>,
    /// String or array, as providers differ.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Identity stored on records this operator commits.
    pub fn operator_id(&self) -> &str {
        &self.sub
    }
}

/// Why an operator token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server holds no verification key.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signed by someone other than the operator's provider.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` is not the configured provider.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` does not name this ledger.
    #[error("invalid audience")]
    InvalidAudience,
    /// A claim the ledger relies on is absent or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Key or payload could not be decoded.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Expired => ErrorCode::TokenExpired,
            Self::NotConfigured => ErrorCode::AuthFailed,
            _ => ErrorCode::InvalidToken,
        }
    }
}

/// Check an operator token and return its claims.
///
/// A token without a `sub` is refused: writes must be attributable.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else if config.secret.is_some() {
        Algorithm::HS256
    } else {
        return Err(AuthError::NotConfigured);
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
            decode(token, &key, &validation).map_err(map_jwt_error)?
        }
        (None, Some(secret)) => {
            let key = DecodingKey::from_secret(secret.as_bytes());
            decode(token, &key, &validation).map_err(map_jwt_error)?
        }
        (None, None) => return Err(AuthError::NotConfigured),
    };

    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken allows some leeway on exp; operators get none
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
