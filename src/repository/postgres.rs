use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;

use super::{Repository, StoreError, StoreResult};
use crate::models::{
    AdminStats, Button, ClickEvent, ClickMetric, MultiLink, NewButton, NewClickEvent,
    NewMultiLink, NewUser, User,
};

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// Every statement binds its parameters; nothing is interpolated into SQL text.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- USERS ---

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let created = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (username, email, password_hash, is_admin, created_at, updated_at)
               VALUES ($1, $2, $3, false, NOW(), NOW())
               RETURNING id, username, email, password_hash, is_admin, created_at, updated_at"#,
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, username, email, password_hash, is_admin, created_at, updated_at
               FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, username, email, password_hash, is_admin, created_at, updated_at
               FROM users WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, username, email, password_hash, is_admin, created_at, updated_at
               FROM users WHERE username = $1"#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"UPDATE users
               SET username = $2, email = $3, password_hash = $4, updated_at = NOW()
               WHERE id = $1
               RETURNING id, username, email, password_hash, is_admin, created_at, updated_at"#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    // --- MULTILINKS ---

    /// create_multilink
    ///
    /// The `multilinks_slug_key` constraint is the authoritative slug guard; a
    /// concurrent insert that slipped past the service pre-check surfaces here as
    /// `StoreError::Conflict`.
    async fn create_multilink(&self, multilink: NewMultiLink) -> StoreResult<MultiLink> {
        let created = sqlx::query_as::<_, MultiLink>(
            r#"INSERT INTO multilinks (user_id, title, description, slug, is_active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
               RETURNING id, user_id, title, description, slug, is_active, created_at, updated_at"#,
        )
        .bind(multilink.user_id)
        .bind(multilink.title)
        .bind(multilink.description)
        .bind(multilink.slug)
        .bind(multilink.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_multilink(&self, id: i64) -> StoreResult<Option<MultiLink>> {
        let multilink = sqlx::query_as::<_, MultiLink>(
            r#"SELECT id, user_id, title, description, slug, is_active, created_at, updated_at
               FROM multilinks WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(multilink)
    }

    async fn get_multilink_by_slug(&self, slug: &str) -> StoreResult<Option<MultiLink>> {
        let multilink = sqlx::query_as::<_, MultiLink>(
            r#"SELECT id, user_id, title, description, slug, is_active, created_at, updated_at
               FROM multilinks WHERE slug = $1"#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(multilink)
    }

    async fn list_multilinks_by_user(&self, user_id: i64) -> StoreResult<Vec<MultiLink>> {
        let multilinks = sqlx::query_as::<_, MultiLink>(
            r#"SELECT id, user_id, title, description, slug, is_active, created_at, updated_at
               FROM multilinks WHERE user_id = $1
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(multilinks)
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM multilinks
                   WHERE slug = $1 AND ($2::BIGINT IS NULL OR id <> $2)
               )"#,
        )
        .bind(slug)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn update_multilink(&self, multilink: &MultiLink) -> StoreResult<MultiLink> {
        sqlx::query_as::<_, MultiLink>(
            r#"UPDATE multilinks
               SET title = $2, description = $3, slug = $4, is_active = $5, updated_at = NOW()
               WHERE id = $1
               RETURNING id, user_id, title, description, slug, is_active, created_at, updated_at"#,
        )
        .bind(multilink.id)
        .bind(&multilink.title)
        .bind(&multilink.description)
        .bind(&multilink.slug)
        .bind(multilink.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    /// delete_multilink_cascade
    ///
    /// Metrics, then buttons, then the page row, inside one transaction. Any
    /// failure drops the transaction, which rolls every step back.
    async fn delete_multilink_cascade(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"DELETE FROM click_metrics
               WHERE button_id IN (SELECT id FROM buttons WHERE multilink_id = $1)"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM buttons WHERE multilink_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM multilinks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    // --- BUTTONS ---

    async fn create_button(&self, button: NewButton) -> StoreResult<Button> {
        let created = sqlx::query_as::<_, Button>(
            r#"INSERT INTO buttons (multilink_id, title, url, icon, color, position, is_active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
               RETURNING id, multilink_id, title, url, icon, color, position, is_active, created_at, updated_at"#,
        )
        .bind(button.multilink_id)
        .bind(button.title)
        .bind(button.url)
        .bind(button.icon)
        .bind(button.color)
        .bind(button.position)
        .bind(button.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_button(&self, id: i64) -> StoreResult<Option<Button>> {
        let button = sqlx::query_as::<_, Button>(
            r#"SELECT id, multilink_id, title, url, icon, color, position, is_active, created_at, updated_at
               FROM buttons WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(button)
    }

    async fn list_buttons(&self, multilink_id: i64) -> StoreResult<Vec<Button>> {
        // BIGSERIAL ids grow with insertion, so `id` breaks position ties stably.
        let buttons = sqlx::query_as::<_, Button>(
            r#"SELECT id, multilink_id, title, url, icon, color, position, is_active, created_at, updated_at
               FROM buttons WHERE multilink_id = $1
               ORDER BY position ASC, id ASC"#,
        )
        .bind(multilink_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(buttons)
    }

    async fn list_active_buttons(&self, multilink_id: i64) -> StoreResult<Vec<Button>> {
        let buttons = sqlx::query_as::<_, Button>(
            r#"SELECT id, multilink_id, title, url, icon, color, position, is_active, created_at, updated_at
               FROM buttons WHERE multilink_id = $1 AND is_active = true
               ORDER BY position ASC, id ASC"#,
        )
        .bind(multilink_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(buttons)
    }

    async fn count_buttons(&self, multilink_id: i64) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM buttons WHERE multilink_id = $1",
        )
        .bind(multilink_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_button(&self, button: &Button) -> StoreResult<Button> {
        sqlx::query_as::<_, Button>(
            r#"UPDATE buttons
               SET title = $2, url = $3, icon = $4, color = $5, position = $6, is_active = $7, updated_at = NOW()
               WHERE id = $1
               RETURNING id, multilink_id, title, url, icon, color, position, is_active, created_at, updated_at"#,
        )
        .bind(button.id)
        .bind(&button.title)
        .bind(&button.url)
        .bind(&button.icon)
        .bind(&button.color)
        .bind(button.position)
        .bind(button.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn update_button_position(
        &self,
        multilink_id: i64,
        button_id: i64,
        position: i32,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE buttons SET position = $3, updated_at = NOW()
               WHERE id = $2 AND multilink_id = $1"#,
        )
        .bind(multilink_id)
        .bind(button_id)
        .bind(position)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_button(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM click_metrics WHERE button_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM buttons WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    // --- CLICK METRICS & EVENTS ---

    async fn get_click_metric(&self, button_id: i64) -> StoreResult<Option<ClickMetric>> {
        let metric = sqlx::query_as::<_, ClickMetric>(
            "SELECT button_id, clicks, last_click_at FROM click_metrics WHERE button_id = $1",
        )
        .bind(button_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(metric)
    }

    /// increment_click_metric
    ///
    /// A single upsert, so concurrent clicks on one button cannot lose increments.
    async fn increment_click_metric(
        &self,
        button_id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<ClickMetric> {
        let metric = sqlx::query_as::<_, ClickMetric>(
            r#"INSERT INTO click_metrics (button_id, clicks, last_click_at)
               VALUES ($1, 1, $2)
               ON CONFLICT (button_id) DO UPDATE
               SET clicks = click_metrics.clicks + 1, last_click_at = EXCLUDED.last_click_at
               RETURNING button_id, clicks, last_click_at"#,
        )
        .bind(button_id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(metric)
    }

    async fn create_click_event(&self, event: NewClickEvent) -> StoreResult<ClickEvent> {
        let created = sqlx::query_as::<_, ClickEvent>(
            r#"INSERT INTO click_events
                   (button_id, ip, user_agent, referer, utm_source, utm_medium, utm_campaign, utm_content, utm_term, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
               RETURNING id, button_id, ip, user_agent, referer, utm_source, utm_medium,
                         utm_campaign, utm_content, utm_term, created_at"#,
        )
        .bind(event.button_id)
        .bind(event.ip)
        .bind(event.user_agent)
        .bind(event.referer)
        .bind(event.utm.utm_source)
        .bind(event.utm.utm_medium)
        .bind(event.utm.utm_campaign)
        .bind(event.utm.utm_content)
        .bind(event.utm.utm_term)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_click_events(
        &self,
        button_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ClickEvent>> {
        let events = sqlx::query_as::<_, ClickEvent>(
            r#"SELECT id, button_id, ip, user_agent, referer, utm_source, utm_medium,
                      utm_campaign, utm_content, utm_term, created_at
               FROM click_events
               WHERE button_id = ANY($1) AND created_at >= $2 AND created_at < $3
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(button_ids)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn utm_source_stats(&self, button_ids: &[i64]) -> StoreResult<BTreeMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT utm_source, COUNT(*) FROM click_events
               WHERE button_id = ANY($1) AND utm_source <> ''
               GROUP BY utm_source"#,
        )
        .bind(button_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn utm_medium_stats(&self, button_ids: &[i64]) -> StoreResult<BTreeMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT utm_medium, COUNT(*) FROM click_events
               WHERE button_id = ANY($1) AND utm_medium <> ''
               GROUP BY utm_medium"#,
        )
        .bind(button_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    // --- ADMIN ---

    /// get_stats
    ///
    /// Compiles all dashboard counters in a single round trip.
    async fn get_stats(&self) -> StoreResult<AdminStats> {
        let (total_users, total_multilinks, total_buttons, total_clicks) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                r#"SELECT
                       (SELECT COUNT(*) FROM users),
                       (SELECT COUNT(*) FROM multilinks),
                       (SELECT COUNT(*) FROM buttons),
                       (SELECT COUNT(*) FROM click_events)"#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(AdminStats {
            total_users,
            total_multilinks,
            total_buttons,
            total_clicks,
        })
    }
}
