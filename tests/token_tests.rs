use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use multilink::{AppError, TokenService, auth::Claims, models::User};
use serde_json::json;

const SECRET: &str = "token-test-secret";

fn alice() -> User {
    User {
        id: 42,
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        is_admin: false,
        ..Default::default()
    }
}

fn service() -> TokenService {
    TokenService::new(SECRET, Duration::hours(24))
}

fn segments(token: &str) -> Vec<&str> {
    token.split('.').collect()
}

#[test]
fn test_issued_token_validates_back_to_claims() {
    let tokens = service();
    let (token, expires_at) = tokens.issue(&alice()).unwrap();

    let claims = tokens.validate(&token).unwrap();
    assert_eq!(claims.user_id, 42);
    assert_eq!(claims.username, "alice");
    assert_eq!(claims.email, "alice@example.com");
    assert!(!claims.is_admin);
    assert_eq!(claims.exp, expires_at);
    // expiry is always issue time + configured lifetime
    assert_eq!(claims.exp - claims.iat, 24 * 3600);
    assert!(expires_at > Utc::now().timestamp());
}

#[test]
fn test_expired_token_is_token_expired() {
    let already_expired = TokenService::new(SECRET, Duration::hours(-1));
    let (token, _) = already_expired.issue(&alice()).unwrap();

    let err = service().validate(&token).unwrap_err();
    assert!(matches!(err, AppError::TokenExpired));
}

#[test]
fn test_signature_from_another_secret_is_invalid() {
    let (token, _) = service().issue(&alice()).unwrap();
    let (foreign, _) = TokenService::new("some-other-secret", Duration::hours(24))
        .issue(&alice())
        .unwrap();

    let ours = segments(&token);
    let theirs = segments(&foreign);
    let spliced = format!("{}.{}.{}", ours[0], ours[1], theirs[2]);

    assert!(matches!(
        service().validate(&spliced),
        Err(AppError::InvalidToken)
    ));
    assert!(matches!(
        service().validate(&foreign),
        Err(AppError::InvalidToken)
    ));
}

#[test]
fn test_tampered_payload_is_invalid() {
    let tokens = service();
    let (token, _) = tokens.issue(&alice()).unwrap();
    let admin = User {
        is_admin: true,
        ..alice()
    };
    let (admin_token, _) = tokens.issue(&admin).unwrap();

    // Payload of the admin token, signature of the plain one.
    let forged = format!(
        "{}.{}.{}",
        segments(&token)[0],
        segments(&admin_token)[1],
        segments(&token)[2]
    );

    assert!(matches!(tokens.validate(&forged), Err(AppError::InvalidToken)));
}

#[test]
fn test_other_algorithm_is_rejected() {
    let claims = Claims {
        user_id: 42,
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        is_admin: true,
        iat: Utc::now().timestamp(),
        exp: Utc::now().timestamp() + 3600,
    };
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(matches!(service().validate(&token), Err(AppError::InvalidToken)));
}

#[test]
fn test_unsigned_token_is_rejected() {
    let (token, _) = service().issue(&alice()).unwrap();
    // {"alg":"none","typ":"JWT"}
    let unsigned = format!("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{}.", segments(&token)[1]);

    assert!(matches!(
        service().validate(&unsigned),
        Err(AppError::InvalidToken)
    ));
}

#[test]
fn test_missing_claim_fails_closed() {
    let payload = json!({
        "user_id": 42,
        "username": "alice",
        "exp": Utc::now().timestamp() + 3600,
    });
    let token = encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(matches!(service().validate(&token), Err(AppError::InvalidToken)));
}

#[test]
fn test_garbage_is_invalid() {
    assert!(matches!(
        service().validate("not-a-token"),
        Err(AppError::InvalidToken)
    ));
    assert!(matches!(service().validate(""), Err(AppError::InvalidToken)));
}
