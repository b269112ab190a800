//! Router Module Index
//!
//! Organizes the API routes into access-tier modules. Access control is applied
//! per module by the router layers in `create_router`, so a handler can only be
//! reached through the tier it was registered in.

use crate::AppState;
use axum::{Router, routing::get};

/// Routes accessible to anonymous clients: auth gateway, public pages and clicks.
pub mod public;

/// Routes protected by the `auth_middleware`. Ownership is checked per resource
/// inside the link and analytics services.
pub mod authenticated;

/// Routes restricted to admin principals.
pub mod admin;

/// Unprefixed liveness probe for monitoring and load balancers.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(|| async { "ok" }))
}
