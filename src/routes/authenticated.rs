use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Authenticated Router Module
///
/// Routes for any principal holding a valid token (mounted under `/api`).
///
/// Access Control Strategy:
/// The `auth_middleware` layer above this router resolves the `AuthUser` first.
/// Every resource-scoped handler then passes the caller's id into the service,
/// which loads the MultiLink (or the Button's parent MultiLink) and runs the
/// ownership guard before any read or mutation. Foreign resources answer 403.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PUT /users/me
        .route("/users/me", get(handlers::get_me).put(handlers::update_me))
        // --- MultiLinks ---
        // GET lists the caller's pages; POST creates one (slug must be free).
        .route(
            "/multilinks",
            get(handlers::list_multilinks).post(handlers::create_multilink),
        )
        .route(
            "/multilinks/{id}",
            get(handlers::get_multilink)
                .put(handlers::update_multilink)
                .delete(handlers::delete_multilink),
        )
        // --- Buttons ---
        .route(
            "/multilinks/{id}/buttons",
            get(handlers::list_buttons).post(handlers::create_button),
        )
        // PUT /multilinks/{id}/buttons/reorder
        // Body: [{ "id": .., "position": .. }, ...], applied entry by entry.
        .route(
            "/multilinks/{id}/buttons/reorder",
            put(handlers::reorder_buttons),
        )
        // PUT/DELETE /buttons/{id}
        // Ownership is resolved through the button's parent MultiLink.
        .route(
            "/buttons/{id}",
            put(handlers::update_button).delete(handlers::delete_button),
        )
        // --- Metrics ---
        .route("/multilinks/{id}/metrics", get(handlers::get_metrics))
        // GET /multilinks/{id}/metrics/daily?range=N
        .route(
            "/multilinks/{id}/metrics/daily",
            get(handlers::get_daily_clicks),
        )
        // GET /multilinks/{id}/metrics/events?from=..&to=..
        .route(
            "/multilinks/{id}/metrics/events",
            get(handlers::get_click_events),
        )
}
