use crate::config::JwtSettings;
use crate::error::AppError;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Represents the claims encoded within a JWT (JSON Web Token).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject of the token, the user's id.
    pub sub: i32,
    /// Issued-at timestamp (seconds since epoch).
    pub iat: usize,
    /// Expiration timestamp (seconds since epoch).
    pub exp: usize,
}

/// Which half of the token pair is being issued or checked. The two kinds are
/// signed with different secrets, so one can never stand in for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The pair returned by login, registration and refresh.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn secret_and_ttl(settings: &JwtSettings, kind: TokenKind) -> (&str, chrono::Duration) {
    match kind {
        TokenKind::Access => (&settings.access_secret, settings.access_ttl),
        TokenKind::Refresh => (&settings.refresh_secret, settings.refresh_ttl),
    }
}

/// Generates a signed JWT of the given kind for a user.
pub fn generate_token(
    user_id: i32,
    kind: TokenKind,
    settings: &JwtSettings,
) -> Result<String, AppError> {
    let (secret, ttl) = secret_and_ttl(settings, kind);
    let now = chrono::Utc::now();
    let expiration = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::InternalServerError("Token lifetime overflow".into()))?;

    let claims = Claims {
        sub: user_id,
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(format!("Failed to generate token: {}", e)))
}

pub fn generate_token_pair(user_id: i32, settings: &JwtSettings) -> Result<TokenPair, AppError> {
    Ok(TokenPair {
        access_token: generate_token(user_id, TokenKind::Access, settings)?,
        refresh_token: generate_token(user_id, TokenKind::Refresh, settings)?,
    })
}

/// Verifies a JWT string of the given kind and decodes its claims.
///
/// Returns `AppError::Unauthorized` if the token is malformed, its signature is
/// invalid, or it has expired.
pub fn verify_token(
    token: &str,
    kind: TokenKind,
    settings: &JwtSettings,
) -> Result<Claims, AppError> {
    let (secret, _) = secret_and_ttl(settings, kind);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

#[cfg(test)]
pub(crate) fn test_settings() -> JwtSettings {
    JwtSettings {
        access_secret: "test_access_secret".into(),
        access_ttl: chrono::Duration::hours(1),
        refresh_secret: "test_refresh_secret".into(),
        refresh_ttl: chrono::Duration::days(30),
    }
}
