use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a token (mounted under `/api`).
///
/// Security Mandate:
/// Page reads here must only ever expose active MultiLinks and their active
/// buttons. The click endpoint refuses inactive buttons.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/register
        // Creates an account and returns a session token (201).
        .route("/auth/register", post(handlers::register))
        // POST /auth/login
        .route("/auth/login", post(handlers::login))
        // GET /users/{username}
        // Public profile: username and join date only.
        .route("/users/{username}", get(handlers::get_public_profile))
        // GET /multilinks/s/{slug}
        // The public page. 404 for absent and inactive pages alike.
        .route("/multilinks/s/{slug}", get(handlers::get_public_multilink))
        // GET /buttons/{id}/click?utm_source=...
        // Logs the click with UTM attribution and answers 302 to the button URL.
        .route("/buttons/{id}/click", get(handlers::record_click))
}
