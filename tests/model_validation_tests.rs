use chrono::Utc;
use multilink::models::{
    CreateButtonRequest, CreateMultiLinkRequest, LoginRequest, MetricsResponse, RegisterRequest,
    UpdateButtonRequest, UpdateMultiLinkRequest, UpdateUserRequest, User,
};
use serde_json::json;
use validator::Validate;

fn registration(username: &str, email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        username: username.to_string(),
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[test]
fn test_register_request_rules() {
    assert!(registration("alice", "alice@example.com", "secret1").validate().is_ok());

    let errors = registration("al", "alice@example.com", "secret1")
        .validate()
        .unwrap_err();
    assert!(errors.field_errors().contains_key("username"));

    let errors = registration(&"a".repeat(31), "alice@example.com", "secret1")
        .validate()
        .unwrap_err();
    assert!(errors.field_errors().contains_key("username"));

    let errors = registration("alice", "not-an-email", "secret1")
        .validate()
        .unwrap_err();
    assert!(errors.field_errors().contains_key("email"));

    let errors = registration("alice", "alice@example.com", "12345")
        .validate()
        .unwrap_err();
    assert!(errors.field_errors().contains_key("password"));
}

#[test]
fn test_login_requires_password() {
    let request = LoginRequest {
        email: "alice@example.com".to_string(),
        password: String::new(),
    };
    assert!(request.validate().is_err());
}

#[test]
fn test_update_user_only_validates_present_fields() {
    assert!(UpdateUserRequest::default().validate().is_ok());

    let request = UpdateUserRequest {
        email: Some("broken".to_string()),
        ..Default::default()
    };
    assert!(request.validate().is_err());
}

#[test]
fn test_user_serialization_hides_password_hash() {
    let user = User {
        id: 1,
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: "$argon2id$v=19$...".to_string(),
        is_admin: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let value = serde_json::to_value(&user).unwrap();
    assert!(value.get("password_hash").is_none());
    assert_eq!(value["username"], "alice");
}

#[test]
fn test_patches_default_missing_fields() {
    // Omitted fields mean "empty/false", which the services interpret per field.
    let patch: UpdateMultiLinkRequest = serde_json::from_value(json!({ "title": "New" })).unwrap();
    assert_eq!(patch.title, "New");
    assert_eq!(patch.slug, "");
    assert_eq!(patch.description, "");
    assert!(!patch.is_active);

    let patch: UpdateButtonRequest = serde_json::from_value(json!({})).unwrap();
    assert_eq!(patch.position, 0);
    assert!(patch.url.is_empty());
}

#[test]
fn test_create_requests_defaults() {
    let request: CreateMultiLinkRequest =
        serde_json::from_value(json!({ "title": "Alice" })).unwrap();
    assert!(request.slug.is_none());
    assert!(!request.is_active);
    assert!(request.validate().is_ok());

    let request: CreateButtonRequest =
        serde_json::from_value(json!({ "title": "Blog", "url": "https://example.com" })).unwrap();
    assert!(request.position.is_none());
    assert!(request.icon.is_empty());

    let request = CreateMultiLinkRequest {
        title: String::new(),
        ..Default::default()
    };
    assert!(request.validate().is_err());
}

#[test]
fn test_metrics_response_shape() {
    let value = serde_json::to_value(MetricsResponse::default()).unwrap();
    assert_eq!(value["total_clicks"], 0);
    assert!(value["button_metrics"].as_array().unwrap().is_empty());
    assert!(value["utm_source_stats"].as_object().unwrap().is_empty());
    assert!(value["utm_medium_stats"].as_object().unwrap().is_empty());
}
