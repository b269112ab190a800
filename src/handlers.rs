use crate::{
    AppState,
    analytics::ClickContext,
    auth::{AdminUser, AuthUser},
    error::AppResult,
    models::{
        AdminStats, AuthResponse, Button, ButtonListResponse, ButtonPosition, ClickEvent,
        CreateButtonRequest, CreateMultiLinkRequest, DailyClicksResponse, LoginRequest,
        MetricsResponse, MultiLink, MultiLinkListResponse, MultiLinkResponse, PublicProfile,
        RegisterRequest, UpdateButtonRequest, UpdateMultiLinkRequest, UpdateUserRequest, User,
        UtmParams,
    },
};
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{convert::Infallible, net::SocketAddr};

// --- Query Structs ---

/// DailyRangeQuery
///
/// Query parameters for GET /api/multilinks/{id}/metrics/daily.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DailyRangeQuery {
    /// Number of days to report, today included (default 7, clamped to 1..=365).
    pub range: Option<i64>,
}

/// EventRangeQuery
///
/// Query parameters for GET /api/multilinks/{id}/metrics/events. RFC 3339 timestamps.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventRangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// --- Extractors ---

/// ClientInfo
///
/// Attribution data of the calling client. The IP prefers proxy headers
/// (`X-Forwarded-For`, then `X-Real-IP`) and falls back to the socket address.
/// Never rejects: anything missing is left empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = forwarded_ip(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();

        Ok(ClientInfo {
            ip,
            user_agent: header_text(&parts.headers, header::USER_AGENT.as_str()),
            referer: header_text(&parts.headers, header::REFERER.as_str()),
        })
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let first_forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    first_forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}

fn header_text(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// --- Accounts ---

/// register
///
/// [Public Route] Creates an account and returns a session token for it.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Invalid Input"),
        (status = 409, description = "Email or Username Taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let session = state.accounts.register(payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// login
///
/// [Public Route] Exchanges email and password for a session token.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged In", body = AuthResponse),
        (status = 401, description = "Invalid Credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.accounts.login(payload).await?))
}

/// get_me
///
/// [Authenticated Route] Returns the caller's own account.
#[utoipa::path(
    get,
    path = "/api/users/me",
    responses((status = 200, description = "Current User", body = User))
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<User>> {
    Ok(Json(state.accounts.me(id).await?))
}

/// update_me
///
/// [Authenticated Route] Partially updates the caller's own account.
#[utoipa::path(
    put,
    path = "/api/users/me",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 409, description = "Email or Username Taken")
    )
)]
pub async fn update_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    Ok(Json(state.accounts.update_me(id, payload).await?))
}

/// get_public_profile
///
/// [Public Route] Username and join date only.
#[utoipa::path(
    get,
    path = "/api/users/{username}",
    responses(
        (status = 200, description = "Public Profile", body = PublicProfile),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_public_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<PublicProfile>> {
    Ok(Json(state.accounts.public_profile(&username).await?))
}

// --- MultiLinks ---

/// get_public_multilink
///
/// [Public Route] Resolves a page by slug. Inactive pages answer 404 and only
/// active buttons are listed.
#[utoipa::path(
    get,
    path = "/api/multilinks/s/{slug}",
    responses(
        (status = 200, description = "Public Page", body = MultiLinkResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_public_multilink(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<MultiLinkResponse>> {
    Ok(Json(state.links.get_public_multilink(&slug).await?))
}

#[utoipa::path(
    get,
    path = "/api/multilinks",
    responses((status = 200, description = "My MultiLinks", body = MultiLinkListResponse))
)]
pub async fn list_multilinks(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<MultiLinkListResponse>> {
    Ok(Json(state.links.list_multilinks(id).await?))
}

/// create_multilink
///
/// [Authenticated Route] Creates a page owned by the caller.
#[utoipa::path(
    post,
    path = "/api/multilinks",
    request_body = CreateMultiLinkRequest,
    responses(
        (status = 201, description = "Created", body = MultiLink),
        (status = 400, description = "Invalid Input"),
        (status = 409, description = "Slug Taken")
    )
)]
pub async fn create_multilink(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateMultiLinkRequest>,
) -> AppResult<impl IntoResponse> {
    let multilink = state.links.create_multilink(id, payload).await?;
    Ok((StatusCode::CREATED, Json(multilink)))
}

/// get_multilink
///
/// [Authenticated Route] Owner view of a page with every button, active or not.
#[utoipa::path(
    get,
    path = "/api/multilinks/{id}",
    responses(
        (status = 200, description = "MultiLink", body = MultiLinkResponse),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_multilink(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<MultiLinkResponse>> {
    Ok(Json(state.links.get_multilink(user_id, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/multilinks/{id}",
    request_body = UpdateMultiLinkRequest,
    responses(
        (status = 200, description = "Updated", body = MultiLink),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Slug Taken")
    )
)]
pub async fn update_multilink(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateMultiLinkRequest>,
) -> AppResult<Json<MultiLink>> {
    Ok(Json(state.links.update_multilink(user_id, id, payload).await?))
}

/// delete_multilink
///
/// [Authenticated Route] Deletes a page together with its buttons and their
/// click counters. Click events are kept.
#[utoipa::path(
    delete,
    path = "/api/multilinks/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_multilink(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.links.delete_multilink(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Buttons ---

#[utoipa::path(
    get,
    path = "/api/multilinks/{id}/buttons",
    responses(
        (status = 200, description = "Buttons", body = ButtonListResponse),
        (status = 403, description = "Not Owner")
    )
)]
pub async fn list_buttons(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ButtonListResponse>> {
    let buttons = state.links.list_buttons(user_id, id).await?;
    Ok(Json(ButtonListResponse { buttons }))
}

/// create_button
///
/// [Authenticated Route] Adds a button to one of the caller's pages. Omitting the
/// position appends it.
#[utoipa::path(
    post,
    path = "/api/multilinks/{id}/buttons",
    request_body = CreateButtonRequest,
    responses(
        (status = 201, description = "Created", body = Button),
        (status = 400, description = "Invalid URL or Input"),
        (status = 403, description = "Not Owner")
    )
)]
pub async fn create_button(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<CreateButtonRequest>,
) -> AppResult<impl IntoResponse> {
    let button = state.links.create_button(user_id, id, payload).await?;
    Ok((StatusCode::CREATED, Json(button)))
}

/// reorder_buttons
///
/// [Authenticated Route] Assigns the supplied positions one by one. Not atomic: a
/// failing entry leaves the earlier ones applied.
#[utoipa::path(
    put,
    path = "/api/multilinks/{id}/buttons/reorder",
    request_body = [ButtonPosition],
    responses(
        (status = 200, description = "Reordered", body = ButtonListResponse),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Unknown Button")
    )
)]
pub async fn reorder_buttons(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<Vec<ButtonPosition>>,
) -> AppResult<Json<ButtonListResponse>> {
    let buttons = state.links.reorder_buttons(user_id, id, payload).await?;
    Ok(Json(ButtonListResponse { buttons }))
}

#[utoipa::path(
    put,
    path = "/api/buttons/{id}",
    request_body = UpdateButtonRequest,
    responses(
        (status = 200, description = "Updated", body = Button),
        (status = 400, description = "Invalid URL"),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_button(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateButtonRequest>,
) -> AppResult<Json<Button>> {
    Ok(Json(state.links.update_button(user_id, id, payload).await?))
}

#[utoipa::path(
    delete,
    path = "/api/buttons/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_button(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.links.delete_button(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Clicks & Metrics ---

/// record_click
///
/// [Public Route] Logs the click with its attribution and redirects to the
/// button's URL. The redirect happens even when the click counter could not be
/// updated.
#[utoipa::path(
    get,
    path = "/api/buttons/{id}/click",
    params(UtmParams),
    responses(
        (status = 302, description = "Redirect to the button URL"),
        (status = 400, description = "Button Inactive"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn record_click(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    client: ClientInfo,
    Query(utm): Query<UtmParams>,
) -> AppResult<impl IntoResponse> {
    let ctx = ClickContext {
        ip: client.ip,
        user_agent: client.user_agent,
        referer: client.referer,
        utm,
    };
    let url = state.analytics.record_click(id, ctx).await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]))
}

/// get_metrics
///
/// [Authenticated Route] Click totals, per-button shares and UTM breakdowns.
#[utoipa::path(
    get,
    path = "/api/multilinks/{id}/metrics",
    responses(
        (status = 200, description = "Metrics", body = MetricsResponse),
        (status = 403, description = "Not Owner"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_metrics(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<MetricsResponse>> {
    Ok(Json(state.analytics.get_multilink_metrics(user_id, id).await?))
}

#[utoipa::path(
    get,
    path = "/api/multilinks/{id}/metrics/daily",
    params(DailyRangeQuery),
    responses(
        (status = 200, description = "Daily Clicks", body = DailyClicksResponse),
        (status = 403, description = "Not Owner")
    )
)]
pub async fn get_daily_clicks(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DailyRangeQuery>,
) -> AppResult<Json<DailyClicksResponse>> {
    Ok(Json(
        state.analytics.daily_clicks(user_id, id, query.range).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/multilinks/{id}/metrics/events",
    params(EventRangeQuery),
    responses(
        (status = 200, description = "Click Events", body = [ClickEvent]),
        (status = 400, description = "Empty Range"),
        (status = 403, description = "Not Owner")
    )
)]
pub async fn get_click_events(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<EventRangeQuery>,
) -> AppResult<Json<Vec<ClickEvent>>> {
    Ok(Json(
        state
            .analytics
            .click_events(user_id, id, query.from, query.to)
            .await?,
    ))
}

// --- Admin ---

/// get_admin_stats
///
/// [Admin Route] System-wide totals for the dashboard.
#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses(
        (status = 200, description = "Stats", body = AdminStats),
        (status = 403, description = "Forbidden")
    )
)]
pub async fn get_admin_stats(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
) -> AppResult<Json<AdminStats>> {
    tracing::debug!(admin_id = admin.id, "admin stats requested");
    Ok(Json(state.analytics.admin_stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_ip_prefers_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_forwarded_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("10.0.0.2"));
        assert_eq!(forwarded_ip(&HeaderMap::new()), None);
    }
}
