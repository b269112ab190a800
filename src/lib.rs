use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use chrono::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod accounts;
pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod links;
pub mod models;
pub mod policy;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::{AdminUser, AuthUser};
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use accounts::AccountService;
pub use analytics::AnalyticsService;
pub use auth::TokenService;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use links::LinkService;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Auto-generates the OpenAPI document from every `#[utoipa::path]` handler and
/// `ToSchema` model. Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::get_me, handlers::update_me,
        handlers::get_public_profile, handlers::get_public_multilink, handlers::list_multilinks,
        handlers::create_multilink, handlers::get_multilink, handlers::update_multilink,
        handlers::delete_multilink, handlers::list_buttons, handlers::create_button,
        handlers::reorder_buttons, handlers::update_button, handlers::delete_button,
        handlers::record_click, handlers::get_metrics, handlers::get_daily_clicks,
        handlers::get_click_events, handlers::get_admin_stats
    ),
    components(
        schemas(
            models::User, models::MultiLink, models::Button, models::ClickMetric,
            models::ClickEvent, models::RegisterRequest, models::LoginRequest,
            models::UpdateUserRequest, models::CreateMultiLinkRequest,
            models::UpdateMultiLinkRequest, models::CreateButtonRequest,
            models::UpdateButtonRequest, models::ButtonPosition, models::AuthResponse,
            models::PublicProfile, models::MultiLinkResponse, models::MultiLinkListResponse,
            models::ButtonListResponse, models::ButtonMetricsData, models::MetricsResponse,
            models::DailyClicks, models::DailyClicksResponse, models::AdminStats,
        )
    ),
    tags(
        (name = "multilink", description = "MultiLink link-in-bio API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Implements the **Unified State Pattern**: the single dependency-injection root
/// holding every service object and the configuration. Cloning is cheap; all
/// services share the same repository handle.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: the shared persistence handle.
    pub repo: RepositoryState,
    /// Issues and validates session tokens.
    pub tokens: TokenService,
    pub accounts: AccountService,
    /// The MultiLink/Button aggregate.
    pub links: LinkService,
    /// Click recording and reporting.
    pub analytics: AnalyticsService,
    /// Configuration: the loaded, immutable environment configuration.
    pub config: AppConfig,
}

impl AppState {
    /// new
    ///
    /// Wires every service against one repository handle and the token secret
    /// and lifetime from `config`.
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        let tokens = TokenService::new(&config.jwt_secret, Duration::hours(config.token_ttl_hours));
        let links = LinkService::new(repo.clone());

        Self {
            accounts: AccountService::new(repo.clone(), tokens.clone()),
            analytics: AnalyticsService::new(repo.clone(), links.clone()),
            links,
            tokens,
            repo,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// Lets `AuthUser` and `AdminUser` pull the token service out of AppState.
impl FromRef<AppState> for TokenService {
    fn from_ref(app_state: &AppState) -> TokenService {
        app_state.tokens.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the `authenticated_routes`.
///
/// *Mechanism*: extracting `AuthUser` validates the Bearer token; on failure the
/// extractor rejects with 401 before the handler runs. On success the resolved
/// identity is stored in the request extensions so handlers reuse it instead of
/// validating the token a second time.
async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// admin_middleware
///
/// Second gate for the admin routes: authenticated (401 otherwise) *and* admin
/// (403 otherwise).
async fn admin_middleware(AdminUser(admin): AdminUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(admin);
    next.run(request).await
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware, and
/// registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. API Router Assembly (everything under /api)
    let api = Router::new()
        // Public Routes: No middleware applied.
        .merge(public::public_routes())
        // Authenticated Routes: Protected by the `auth_middleware`.
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        // Admin Routes: Nested under '/admin' behind the admin gate.
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), admin_middleware)),
        );

    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes::health_routes())
        .nest("/api", api)
        // Apply the Unified State to all routes.
        .with_state(state);

    // 3. Observability and Correlation Layers (Applied outermost/first)
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation: a UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing: wraps the request/response lifecycle in a span
                // carrying the generated request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation: echoes x-request-id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Used by `TraceLayer` to build the per-request span. Includes the `x-request-id`
/// header so every log line of one request is correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
