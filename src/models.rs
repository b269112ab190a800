use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use ts_rs::TS;
use utoipa::ToSchema;
use validator::Validate;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The identity principal, stored in the `users` table. The password hash is loaded
/// from the row for verification but never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub is_admin: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// NewUser
///
/// Insert payload for a freshly registered account. Registration never grants admin.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// MultiLink
///
/// A user's public page, stored in the `multilinks` table. `user_id` is fixed at
/// creation and `slug` is unique across every page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct MultiLink {
    pub id: i64,
    // FK to users.id (Owner).
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub slug: String,
    // Gates visibility on the public slug lookup.
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMultiLink {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub slug: String,
    pub is_active: bool,
}

/// Button
///
/// One clickable link of a MultiLink, stored in the `buttons` table.
/// `position` orders the page; it is neither contiguous nor unique.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Button {
    pub id: i64,
    // FK to multilinks.id (Parent), immutable.
    pub multilink_id: i64,
    pub title: String,
    pub url: String,
    pub icon: String,
    pub color: String,
    pub position: i32,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewButton {
    pub multilink_id: i64,
    pub title: String,
    pub url: String,
    pub icon: String,
    pub color: String,
    pub position: i32,
    pub is_active: bool,
}

/// ClickMetric
///
/// Denormalized running counter, one row per button in `click_metrics`.
/// Always reconstructable from the `click_events` log.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ClickMetric {
    pub button_id: i64,
    pub clicks: i64,
    #[ts(type = "string | null")]
    pub last_click_at: Option<DateTime<Utc>>,
}

/// ClickEvent
///
/// Append-only attribution record of a single click, stored in `click_events`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ClickEvent {
    pub id: i64,
    pub button_id: i64,
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewClickEvent {
    pub button_id: i64,
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub utm: UtmParams,
}

/// UtmParams
///
/// The five campaign-tracking query parameters of a click. Absent parameters are empty.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, utoipa::IntoParams, Default, PartialEq)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct UtmParams {
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Input payload for POST /api/auth/register.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 30))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6))]
    pub password: String,
}

/// LoginRequest
///
/// Input payload for POST /api/auth/login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// UpdateUserRequest
///
/// Partial update of the caller's own account (PUT /api/users/me). `None` leaves a field untouched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 3, max = 30))]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 6))]
    pub password: Option<String>,
}

/// CreateMultiLinkRequest
///
/// Input payload for POST /api/multilinks. A missing slug is derived from the title.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateMultiLinkRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    // Checked by the link service; empty counts as omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

/// UpdateMultiLinkRequest
///
/// Patch for PUT /api/multilinks/{id}. Empty `title`/`slug` mean "no change";
/// `description` and `is_active` are always written, including empty/false.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(default)]
#[ts(export)]
pub struct UpdateMultiLinkRequest {
    pub title: String,
    pub description: String,
    pub slug: String,
    pub is_active: bool,
}

/// CreateButtonRequest
///
/// Input payload for POST /api/multilinks/{id}/buttons. A missing or zero position appends.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateButtonRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default)]
    pub is_active: bool,
}

/// UpdateButtonRequest
///
/// Patch for PUT /api/buttons/{id}. Empty `title`/`url` and zero `position` mean
/// "no change"; `icon`, `color` and `is_active` are always written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(default)]
#[ts(export)]
pub struct UpdateButtonRequest {
    pub title: String,
    pub url: String,
    pub icon: String,
    pub color: String,
    pub position: i32,
    pub is_active: bool,
}

/// ButtonPosition
///
/// One entry of a reorder batch (PUT /api/multilinks/{id}/buttons/reorder).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct ButtonPosition {
    pub id: i64,
    pub position: i32,
}

// --- Response Schemas (Output) ---

/// AuthResponse
///
/// Returned by register and login. `expires_at` is in unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
    pub expires_at: i64,
}

/// PublicProfile
///
/// The only user data exposed without authentication (GET /api/users/{username}).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PublicProfile {
    pub username: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MultiLinkResponse {
    pub multilink: MultiLink,
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MultiLinkListResponse {
    pub multilinks: Vec<MultiLink>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ButtonListResponse {
    pub buttons: Vec<Button>,
}

/// ButtonMetricsData
///
/// Per-button slice of the metrics report. `percentage` is the share of the
/// MultiLink's total clicks, 0 when there are none.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct ButtonMetricsData {
    pub button_id: i64,
    pub button_name: String,
    pub clicks: i64,
    pub percentage: f64,
}

/// MetricsResponse
///
/// Output of GET /api/multilinks/{id}/metrics.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq, Default)]
#[ts(export)]
pub struct MetricsResponse {
    pub total_clicks: i64,
    pub button_metrics: Vec<ButtonMetricsData>,
    pub utm_source_stats: BTreeMap<String, i64>,
    pub utm_medium_stats: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct DailyClicks {
    #[ts(type = "string")]
    pub date: NaiveDate,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DailyClicksResponse {
    pub daily_clicks: Vec<DailyClicks>,
}

/// AdminStats
///
/// Output schema for GET /api/admin/stats.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct AdminStats {
    pub total_users: i64,
    pub total_multilinks: i64,
    pub total_buttons: i64,
    pub total_clicks: i64,
}
