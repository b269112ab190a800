use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use chrono::Utc;
use multilink::{
    AppConfig, AppState, InMemoryRepository, RepositoryState, create_router,
    repository::{FailPoint, Repository},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<InMemoryRepository>,
}

fn spawn_app() -> TestApp {
    let store = Arc::new(InMemoryRepository::new());
    let repo: RepositoryState = store.clone();
    let state = AppState::new(repo, AppConfig::default());

    TestApp {
        router: create_router(state),
        store,
    }
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn register(&self, username: &str) -> (String, i64) {
        let response = self
            .call(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "secret1"
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        (
            response.body["token"].as_str().unwrap().to_string(),
            response.body["user"]["id"].as_i64().unwrap(),
        )
    }

    async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app();
    let response = app.call("GET", "/health", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_register_login_scenario() {
    let app = spawn_app();

    let response = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "secret1"
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body["token"].as_str().is_some());
    assert!(response.body["expires_at"].as_i64().unwrap() > Utc::now().timestamp());
    assert_eq!(response.body["user"]["username"], "alice");
    assert!(response.body["user"].get("password_hash").is_none());
    let alice_token = response.body["token"].as_str().unwrap().to_string();

    // Wrong password.
    let response = app.login("alice@example.com", "wrong-pass").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Unknown email looks the same.
    let response = app.login("nobody@example.com", "secret1").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app.login("alice@example.com", "secret1").await;
    assert_eq!(response.status, StatusCode::OK);

    // Alice claims the slug.
    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&alice_token),
            Some(json!({ "title": "Alice", "slug": "alice-page" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let multilink_id = response.body["id"].as_i64().unwrap();

    // Bob cannot take it.
    let (bob_token, _) = app.register("bob").await;
    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&bob_token),
            Some(json!({ "title": "Bob", "slug": "alice-page" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["error"], "conflict");

    // Clicking an inactive button is refused and leaves no trace.
    let response = app
        .call(
            "POST",
            &format!("/api/multilinks/{multilink_id}/buttons"),
            Some(&alice_token),
            Some(json!({ "title": "Draft", "url": "https://example.com/draft", "is_active": false })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let button_id = response.body["id"].as_i64().unwrap();

    let response = app
        .call("GET", &format!("/api/buttons/{button_id}/click"), None, None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "button_inactive");
    assert!(app.store.all_click_events().unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = spawn_app();
    app.register("alice").await;

    let response = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "username": "alice2",
                "email": "alice@example.com",
                "password": "secret1"
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "username": "al", "email": "not-an-email", "password": "123" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_input");
}

#[tokio::test]
async fn test_authentication_is_required() {
    let app = spawn_app();

    let response = app.call("GET", "/api/multilinks", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "unauthenticated");

    let response = app
        .call("GET", "/api/users/me", Some("definitely.not.valid"), None)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "invalid_token");

    let response = app
        .call("POST", "/api/multilinks", None, Some(json!({ "title": "Sneaky" })))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ownership_is_enforced_over_http() {
    let app = spawn_app();
    let (alice_token, _) = app.register("alice").await;
    let (bob_token, _) = app.register("bob").await;

    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&alice_token),
            Some(json!({ "title": "Alice", "slug": "alice-page", "is_active": true })),
        )
        .await;
    let multilink_id = response.body["id"].as_i64().unwrap();

    let response = app
        .call(
            "POST",
            &format!("/api/multilinks/{multilink_id}/buttons"),
            Some(&alice_token),
            Some(json!({ "title": "Blog", "url": "https://example.com/blog", "is_active": true })),
        )
        .await;
    let button_id = response.body["id"].as_i64().unwrap();

    let patch = json!({ "title": "Mine now", "is_active": true });
    let uri = format!("/api/multilinks/{multilink_id}");

    let response = app.call("PUT", &uri, Some(&bob_token), Some(patch.clone())).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["error"], "forbidden");

    let response = app
        .call("DELETE", &format!("/api/buttons/{button_id}"), Some(&bob_token), None)
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app
        .call("GET", &format!("{uri}/metrics"), Some(&bob_token), None)
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app.call("PUT", &uri, Some(&alice_token), Some(patch)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["title"], "Mine now");

    let response = app
        .call("DELETE", "/api/multilinks/999", Some(&alice_token), None)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_page_and_click_redirect() {
    let app = spawn_app();
    let (token, _) = app.register("alice").await;

    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&token),
            Some(json!({ "title": "Alice", "slug": "alice-page", "is_active": true })),
        )
        .await;
    let multilink_id = response.body["id"].as_i64().unwrap();

    let mut button_ids = Vec::new();
    for (title, active) in [("Blog", true), ("Draft", false)] {
        let response = app
            .call(
                "POST",
                &format!("/api/multilinks/{multilink_id}/buttons"),
                Some(&token),
                Some(json!({
                    "title": title,
                    "url": format!("https://example.com/{}", title.to_lowercase()),
                    "is_active": active
                })),
            )
            .await;
        button_ids.push(response.body["id"].as_i64().unwrap());
    }

    let response = app.call("GET", "/api/multilinks/s/alice-page", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["multilink"]["slug"], "alice-page");
    assert_eq!(response.body["buttons"].as_array().unwrap().len(), 1);

    let request = Request::builder()
        .uri(format!(
            "/api/buttons/{}/click?utm_source=newsletter&utm_medium=email",
            button_ids[0]
        ))
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header(header::USER_AGENT, "curl/8.0")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(
        response.headers.get(header::LOCATION).unwrap(),
        "https://example.com/blog"
    );

    let events = app.store.all_click_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ip, "203.0.113.7");
    assert_eq!(events[0].user_agent, "curl/8.0");
    assert_eq!(events[0].utm_source, "newsletter");

    let response = app
        .call(
            "GET",
            &format!("/api/multilinks/{multilink_id}/metrics"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total_clicks"], 1);
    assert_eq!(response.body["utm_source_stats"]["newsletter"], 1);

    let response = app
        .call(
            "GET",
            &format!("/api/multilinks/{multilink_id}/metrics/daily?range=3"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["daily_clicks"].as_array().unwrap().len(), 3);

    let response = app.call("GET", "/api/buttons/999/click", None, None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    // Deactivating the page hides it.
    app.call(
        "PUT",
        &format!("/api/multilinks/{multilink_id}"),
        Some(&token),
        Some(json!({ "is_active": false })),
    )
    .await;
    let response = app.call("GET", "/api/multilinks/s/alice-page", None, None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reorder_over_http() {
    let app = spawn_app();
    let (token, _) = app.register("alice").await;
    let response = app
        .call("POST", "/api/multilinks", Some(&token), Some(json!({ "title": "Alice Links" })))
        .await;
    assert_eq!(response.body["slug"], "alice-links");
    let multilink_id = response.body["id"].as_i64().unwrap();

    let mut ids = Vec::new();
    for title in ["one", "two"] {
        let response = app
            .call(
                "POST",
                &format!("/api/multilinks/{multilink_id}/buttons"),
                Some(&token),
                Some(json!({ "title": title, "url": "https://example.com" })),
            )
            .await;
        ids.push(response.body["id"].as_i64().unwrap());
    }

    let response = app
        .call(
            "PUT",
            &format!("/api/multilinks/{multilink_id}/buttons/reorder"),
            Some(&token),
            Some(json!([
                { "id": ids[0], "position": 2 },
                { "id": ids[1], "position": 1 }
            ])),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let buttons = response.body["buttons"].as_array().unwrap();
    assert_eq!(buttons[0]["title"], "two");
    assert_eq!(buttons[1]["title"], "one");
}

#[tokio::test]
async fn test_admin_stats_require_admin() {
    let app = spawn_app();
    let (token, user_id) = app.register("alice").await;

    let response = app.call("GET", "/api/admin/stats", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app.call("GET", "/api/admin/stats", Some(&token), None).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    // The admin flag travels in the token, so a fresh login picks it up.
    app.store.promote_to_admin(user_id).unwrap();
    let response = app.login("alice@example.com", "secret1").await;
    let admin_token = response.body["token"].as_str().unwrap().to_string();

    let response = app.call("GET", "/api/admin/stats", Some(&admin_token), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total_users"], 1);
    assert_eq!(response.body["total_multilinks"], 0);
}

#[tokio::test]
async fn test_profile_routes() {
    let app = spawn_app();
    let (token, _) = app.register("alice").await;
    app.register("bob").await;

    let response = app.call("GET", "/api/users/alice", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["username"], "alice");
    assert!(response.body.get("email").is_none());

    let response = app.call("GET", "/api/users/ghost", None, None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = app.call("GET", "/api/users/me", Some(&token), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["email"], "alice@example.com");

    let response = app
        .call("PUT", "/api/users/me", Some(&token), Some(json!({ "username": "bob" })))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .call("PUT", "/api/users/me", Some(&token), Some(json!({ "username": "alicia" })))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["username"], "alicia");
}

#[tokio::test]
async fn test_click_redirects_for_url_with_embedded_newline() {
    let app = spawn_app();
    let (token, _) = app.register("alice").await;

    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&token),
            Some(json!({ "title": "Alice", "slug": "alice-page", "is_active": true })),
        )
        .await;
    let multilink_id = response.body["id"].as_i64().unwrap();

    let response = app
        .call(
            "POST",
            &format!("/api/multilinks/{multilink_id}/buttons"),
            Some(&token),
            Some(json!({ "title": "Odd", "url": "https://example.com/a\nb", "is_active": true })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["url"], "https://example.com/ab");
    let button_id = response.body["id"].as_i64().unwrap();

    let response = app
        .call("GET", &format!("/api/buttons/{button_id}/click"), None, None)
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(
        response.headers.get(header::LOCATION).unwrap(),
        "https://example.com/ab"
    );
    assert_eq!(app.store.all_click_events().unwrap().len(), 1);
}

#[tokio::test]
async fn test_registered_id_is_rederivable_by_username_and_email() {
    let app = spawn_app();
    let (_, user_id) = app.register("alice").await;

    let by_username = app.store.get_user_by_username("alice").await.unwrap().unwrap();
    let by_email = app
        .store
        .get_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_username.id, user_id);
    assert_eq!(by_email.id, user_id);

    let response = app.login("alice@example.com", "secret1").await;
    assert_eq!(response.body["user"]["id"].as_i64(), Some(user_id));
}

#[tokio::test]
async fn test_slug_race_past_pre_check_answers_conflict() {
    let app = spawn_app();
    let (alice_token, _) = app.register("alice").await;
    let (bob_token, _) = app.register("bob").await;

    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&alice_token),
            Some(json!({ "title": "Alice", "slug": "alice-page" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    app.store.fail_on(FailPoint::StaleSlugCheck);
    let response = app
        .call(
            "POST",
            "/api/multilinks",
            Some(&bob_token),
            Some(json!({ "title": "Bob", "slug": "alice-page" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["error"], "conflict");
}

#[tokio::test]
async fn test_bearer_scheme_is_case_insensitive() {
    let app = spawn_app();
    let (token, _) = app.register("alice").await;

    for scheme in ["bearer", "BEARER"] {
        let request = Request::builder()
            .uri("/api/users/me")
            .header(header::AUTHORIZATION, format!("{scheme} {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.send(request).await;
        assert_eq!(response.status, StatusCode::OK, "{scheme} rejected");
        assert_eq!(response.body["username"], "alice");
    }
}
