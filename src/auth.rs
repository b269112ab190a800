use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::User,
    policy,
};

/// Claims
///
/// The fixed payload carried inside every issued token. Every field is required:
/// a token missing one of them fails deserialization and is rejected as invalid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    /// Issued At (iat), unix seconds.
    pub iat: i64,
    /// Expiration Time (exp), unix seconds.
    pub exp: i64,
}

/// TokenService
///
/// Issues and validates HS256-signed, time-limited identity tokens. The service is
/// a pure function of its secret, its configured lifetime and the clock.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// issue
    ///
    /// Signs a token for `user` expiring at `now + ttl`.
    /// Returns the encoded token and its expiry in unix seconds.
    pub fn issue(&self, user: &User) -> AppResult<(String, i64)> {
        let now = Utc::now();
        let expires_at = (now + self.ttl).timestamp();

        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            iat: now.timestamp(),
            exp: expires_at,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))?;

        Ok((token, expires_at))
    }

    /// validate
    ///
    /// Decodes and verifies `token`. Only HS256 is accepted; any other algorithm
    /// (including unsigned tokens), a bad signature or a malformed payload yields
    /// `InvalidToken`. An elapsed expiry yields `TokenExpired`.
    pub fn validate(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                return match e.kind() {
                    ErrorKind::ExpiredSignature => Err(AppError::TokenExpired),
                    _ => {
                        tracing::debug!(error = %e, "token rejected");
                        Err(AppError::InvalidToken)
                    }
                };
            }
        };

        // Enforced here too, independent of the decoder's own exp handling.
        if Utc::now().timestamp() > claims.exp {
            return Err(AppError::TokenExpired);
        }

        Ok(claims)
    }
}

/// hash_password
///
/// Produces an Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("stored password hash unreadable: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// AuthUser
///
/// The resolved identity of an authenticated request, built straight from the
/// validated token claims.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.user_id,
            username: claims.username,
            email: claims.email,
            is_admin: claims.is_admin,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))?;

    // The scheme name is case-insensitive.
    value
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("malformed authorization header".to_string()))
}

/// AuthUser Extractor Implementation
///
/// Makes `AuthUser` usable as a handler argument. When the access-control
/// middleware has already authenticated the request, the identity it stored in
/// the request extensions is reused; otherwise the Bearer token is validated here.
///
/// Rejection: `Unauthenticated`, `InvalidToken` or `TokenExpired` (all 401).
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let token = bearer_token(&parts.headers)?;
        let claims = TokenService::from_ref(state).validate(token)?;

        Ok(AuthUser::from(claims))
    }
}

/// AdminUser
///
/// An `AuthUser` that additionally passed `require_admin`. Rejects with 403 for
/// authenticated non-admins.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        policy::require_admin(&user)?;
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("secret1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secret1", &hash).unwrap());
        assert!(!verify_password("secret2", &hash).unwrap());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            bearer_token(&headers),
            Err(AppError::Unauthenticated(_))
        ));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(matches!(
            bearer_token(&headers),
            Err(AppError::Unauthenticated(_))
        ));

        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

        headers.insert(header::AUTHORIZATION, "bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearerabc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }
}
