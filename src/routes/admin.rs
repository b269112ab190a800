use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// Routes exclusively for admin principals, nested under `/api/admin`.
///
/// Access Control:
/// Wrapped in `admin_middleware`, which authenticates the caller and then requires
/// the admin flag from the token claims. Admins gain no ownership bypass on any
/// other route.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/stats
        // Totals of users, multilinks, buttons and click events.
        .route("/stats", get(handlers::get_admin_stats))
}
