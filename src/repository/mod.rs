use crate::models::{
    AdminStats, Button, ClickEvent, ClickMetric, MultiLink, NewButton, NewClickEvent,
    NewMultiLink, NewUser, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

mod memory;
mod postgres;

pub use memory::{FailPoint, InMemoryRepository};
pub use postgres::PostgresRepository;

/// StoreError
///
/// What a persistence call can report back. Lookups that may legitimately miss
/// return `Ok(None)`; `NotFound` is reserved for writes that matched no row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    /// A uniqueness constraint rejected the write. Carries the constraint/column.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(
                db.constraint().unwrap_or("unique constraint").to_string(),
            ),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations. Handlers and
/// services only ever see `Arc<dyn Repository>`, so the Postgres store and the
/// in-memory store are interchangeable.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// safely shareable across Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn get_user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    // Overwrites username, email and password hash of an existing user.
    async fn update_user(&self, user: &User) -> StoreResult<User>;

    // --- MultiLinks ---
    async fn create_multilink(&self, multilink: NewMultiLink) -> StoreResult<MultiLink>;
    async fn get_multilink(&self, id: i64) -> StoreResult<Option<MultiLink>>;
    async fn get_multilink_by_slug(&self, slug: &str) -> StoreResult<Option<MultiLink>>;
    async fn list_multilinks_by_user(&self, user_id: i64) -> StoreResult<Vec<MultiLink>>;
    /// True when another MultiLink (not `exclude_id`) already uses `slug`.
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> StoreResult<bool>;
    async fn update_multilink(&self, multilink: &MultiLink) -> StoreResult<MultiLink>;
    /// Deletes the MultiLink together with its buttons and their click metrics
    /// as one failure-atomic unit. Click events are kept.
    async fn delete_multilink_cascade(&self, id: i64) -> StoreResult<()>;

    // --- Buttons ---
    async fn create_button(&self, button: NewButton) -> StoreResult<Button>;
    async fn get_button(&self, id: i64) -> StoreResult<Option<Button>>;
    /// All buttons of a MultiLink ordered by position, ties in insertion order.
    async fn list_buttons(&self, multilink_id: i64) -> StoreResult<Vec<Button>>;
    /// Same ordering as `list_buttons`, restricted to `is_active = true`.
    async fn list_active_buttons(&self, multilink_id: i64) -> StoreResult<Vec<Button>>;
    async fn count_buttons(&self, multilink_id: i64) -> StoreResult<i64>;
    async fn update_button(&self, button: &Button) -> StoreResult<Button>;
    /// Sets one button's position; `NotFound` if the button is not a child of `multilink_id`.
    async fn update_button_position(
        &self,
        multilink_id: i64,
        button_id: i64,
        position: i32,
    ) -> StoreResult<()>;
    /// Deletes the button's click metric, then the button, as one unit.
    async fn delete_button(&self, id: i64) -> StoreResult<()>;

    // --- Click Metrics & Events ---
    async fn get_click_metric(&self, button_id: i64) -> StoreResult<Option<ClickMetric>>;
    /// `clicks += 1, last_click_at = at`, creating the metric on first use.
    async fn increment_click_metric(
        &self,
        button_id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<ClickMetric>;
    async fn create_click_event(&self, event: NewClickEvent) -> StoreResult<ClickEvent>;
    /// Events of the given buttons with `from <= created_at < to`, oldest first.
    async fn list_click_events(
        &self,
        button_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ClickEvent>>;
    /// Event counts per non-empty utm_source across the given buttons.
    async fn utm_source_stats(&self, button_ids: &[i64]) -> StoreResult<BTreeMap<String, i64>>;
    /// Event counts per non-empty utm_medium across the given buttons.
    async fn utm_medium_stats(&self, button_ids: &[i64]) -> StoreResult<BTreeMap<String, i64>>;

    // --- Admin ---
    async fn get_stats(&self) -> StoreResult<AdminStats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
