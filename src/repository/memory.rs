use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{Repository, StoreError, StoreResult};
use crate::models::{
    AdminStats, Button, ClickEvent, ClickMetric, MultiLink, NewButton, NewClickEvent,
    NewMultiLink, NewUser, User,
};

/// FailPoint
///
/// An injectable store failure. While armed, the matching call returns
/// `StoreError::Backend` without touching any state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateClickEvent,
    IncrementMetric,
    /// Metric lookup for one specific button.
    MetricLookup(i64),
    UtmStats,
    /// Position update for one specific button during a reorder.
    ButtonPosition(i64),
    /// The cascade delete of a MultiLink.
    DeleteMultiLink,
    ListButtons,
    /// Slug pre-check reports every slug as free, as if a concurrent insert
    /// landed right after it. Not an error: the insert's constraint decides.
    StaleSlugCheck,
}

#[derive(Default)]
struct State {
    users: Vec<User>,
    multilinks: Vec<MultiLink>,
    buttons: Vec<Button>,
    metrics: Vec<ClickMetric>,
    events: Vec<ClickEvent>,
    next_user_id: i64,
    next_multilink_id: i64,
    next_button_id: i64,
    next_event_id: i64,
    failures: HashSet<FailPoint>,
}

impl State {
    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.failures.contains(&point) {
            return Err(StoreError::Backend(format!("injected failure: {point:?}")));
        }
        Ok(())
    }

    fn sorted_buttons(&self, multilink_id: i64, active_only: bool) -> Vec<Button> {
        let mut buttons: Vec<Button> = self
            .buttons
            .iter()
            .filter(|b| b.multilink_id == multilink_id && (!active_only || b.is_active))
            .cloned()
            .collect();
        // Ids are handed out in insertion order, so they break position ties.
        buttons.sort_by_key(|b| (b.position, b.id));
        buttons
    }
}

/// InMemoryRepository
///
/// A process-local `Repository` used by the test suite and by local runs without a
/// `DATABASE_URL`. It enforces the same uniqueness rules as the Postgres schema and
/// supports armed `FailPoint`s for exercising error paths.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a failure point until `clear_failures` is called.
    pub fn fail_on(&self, point: FailPoint) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(point);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.clear();
        }
    }

    /// Grants the admin flag. Registration never does, so seeding goes through here.
    pub fn promote_to_admin(&self, user_id: i64) -> StoreResult<()> {
        let mut state = self.lock()?;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound)?;
        user.is_admin = true;
        Ok(())
    }

    /// Every click event ever recorded, oldest first.
    pub fn all_click_events(&self) -> StoreResult<Vec<ClickEvent>> {
        Ok(self.lock()?.events.clone())
    }

    /// Inserts an event with an explicit timestamp (used to backfill history).
    pub fn insert_click_event_at(
        &self,
        event: NewClickEvent,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ClickEvent> {
        let mut state = self.lock()?;
        Ok(push_event(&mut state, event, created_at))
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }
}

fn push_event(state: &mut State, event: NewClickEvent, created_at: DateTime<Utc>) -> ClickEvent {
    state.next_event_id += 1;
    let created = ClickEvent {
        id: state.next_event_id,
        button_id: event.button_id,
        ip: event.ip,
        user_agent: event.user_agent,
        referer: event.referer,
        utm_source: event.utm.utm_source,
        utm_medium: event.utm.utm_medium,
        utm_campaign: event.utm.utm_campaign,
        utm_content: event.utm.utm_content,
        utm_term: event.utm.utm_term,
        created_at,
    };
    state.events.push(created.clone());
    created
}

fn count_by<F>(events: &[ClickEvent], button_ids: &[i64], key: F) -> BTreeMap<String, i64>
where
    F: Fn(&ClickEvent) -> &str,
{
    let mut stats = BTreeMap::new();
    for event in events.iter().filter(|e| button_ids.contains(&e.button_id)) {
        let value = key(event);
        if !value.is_empty() {
            *stats.entry(value.to_string()).or_insert(0) += 1;
        }
    }
    stats
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.lock()?;
        if state.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("users_username_key".to_string()));
        }
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }

        state.next_user_id += 1;
        let now = Utc::now();
        let created = User {
            id: state.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        state.users.push(created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut state = self.lock()?;
        if state
            .users
            .iter()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(StoreError::Conflict("users_username_key".to_string()));
        }
        if state
            .users
            .iter()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }

        let stored = state
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(StoreError::NotFound)?;
        stored.username = user.username.clone();
        stored.email = user.email.clone();
        stored.password_hash = user.password_hash.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn create_multilink(&self, multilink: NewMultiLink) -> StoreResult<MultiLink> {
        let mut state = self.lock()?;
        if state.multilinks.iter().any(|m| m.slug == multilink.slug) {
            return Err(StoreError::Conflict("multilinks_slug_key".to_string()));
        }

        state.next_multilink_id += 1;
        let now = Utc::now();
        let created = MultiLink {
            id: state.next_multilink_id,
            user_id: multilink.user_id,
            title: multilink.title,
            description: multilink.description,
            slug: multilink.slug,
            is_active: multilink.is_active,
            created_at: now,
            updated_at: now,
        };
        state.multilinks.push(created.clone());
        Ok(created)
    }

    async fn get_multilink(&self, id: i64) -> StoreResult<Option<MultiLink>> {
        Ok(self.lock()?.multilinks.iter().find(|m| m.id == id).cloned())
    }

    async fn get_multilink_by_slug(&self, slug: &str) -> StoreResult<Option<MultiLink>> {
        Ok(self
            .lock()?
            .multilinks
            .iter()
            .find(|m| m.slug == slug)
            .cloned())
    }

    async fn list_multilinks_by_user(&self, user_id: i64) -> StoreResult<Vec<MultiLink>> {
        let mut multilinks: Vec<MultiLink> = self
            .lock()?
            .multilinks
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        // Newest first, matching the Postgres ordering.
        multilinks.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(multilinks)
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> StoreResult<bool> {
        let state = self.lock()?;
        if state.failures.contains(&FailPoint::StaleSlugCheck) {
            return Ok(false);
        }
        Ok(state
            .multilinks
            .iter()
            .any(|m| m.slug == slug && Some(m.id) != exclude_id))
    }

    async fn update_multilink(&self, multilink: &MultiLink) -> StoreResult<MultiLink> {
        let mut state = self.lock()?;
        if state
            .multilinks
            .iter()
            .any(|m| m.id != multilink.id && m.slug == multilink.slug)
        {
            return Err(StoreError::Conflict("multilinks_slug_key".to_string()));
        }

        let stored = state
            .multilinks
            .iter_mut()
            .find(|m| m.id == multilink.id)
            .ok_or(StoreError::NotFound)?;
        stored.title = multilink.title.clone();
        stored.description = multilink.description.clone();
        stored.slug = multilink.slug.clone();
        stored.is_active = multilink.is_active;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_multilink_cascade(&self, id: i64) -> StoreResult<()> {
        let mut state = self.lock()?;
        // Checked before any mutation, so a failure leaves everything in place.
        state.check(FailPoint::DeleteMultiLink)?;
        if !state.multilinks.iter().any(|m| m.id == id) {
            return Err(StoreError::NotFound);
        }

        let button_ids: Vec<i64> = state
            .buttons
            .iter()
            .filter(|b| b.multilink_id == id)
            .map(|b| b.id)
            .collect();
        state.metrics.retain(|m| !button_ids.contains(&m.button_id));
        state.buttons.retain(|b| b.multilink_id != id);
        state.multilinks.retain(|m| m.id != id);
        Ok(())
    }

    async fn create_button(&self, button: NewButton) -> StoreResult<Button> {
        let mut state = self.lock()?;
        state.next_button_id += 1;
        let now = Utc::now();
        let created = Button {
            id: state.next_button_id,
            multilink_id: button.multilink_id,
            title: button.title,
            url: button.url,
            icon: button.icon,
            color: button.color,
            position: button.position,
            is_active: button.is_active,
            created_at: now,
            updated_at: now,
        };
        state.buttons.push(created.clone());
        Ok(created)
    }

    async fn get_button(&self, id: i64) -> StoreResult<Option<Button>> {
        Ok(self.lock()?.buttons.iter().find(|b| b.id == id).cloned())
    }

    async fn list_buttons(&self, multilink_id: i64) -> StoreResult<Vec<Button>> {
        let state = self.lock()?;
        state.check(FailPoint::ListButtons)?;
        Ok(state.sorted_buttons(multilink_id, false))
    }

    async fn list_active_buttons(&self, multilink_id: i64) -> StoreResult<Vec<Button>> {
        let state = self.lock()?;
        state.check(FailPoint::ListButtons)?;
        Ok(state.sorted_buttons(multilink_id, true))
    }

    async fn count_buttons(&self, multilink_id: i64) -> StoreResult<i64> {
        let count = self
            .lock()?
            .buttons
            .iter()
            .filter(|b| b.multilink_id == multilink_id)
            .count();
        Ok(count as i64)
    }

    async fn update_button(&self, button: &Button) -> StoreResult<Button> {
        let mut state = self.lock()?;
        let stored = state
            .buttons
            .iter_mut()
            .find(|b| b.id == button.id)
            .ok_or(StoreError::NotFound)?;
        stored.title = button.title.clone();
        stored.url = button.url.clone();
        stored.icon = button.icon.clone();
        stored.color = button.color.clone();
        stored.position = button.position;
        stored.is_active = button.is_active;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn update_button_position(
        &self,
        multilink_id: i64,
        button_id: i64,
        position: i32,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.check(FailPoint::ButtonPosition(button_id))?;
        let stored = state
            .buttons
            .iter_mut()
            .find(|b| b.id == button_id && b.multilink_id == multilink_id)
            .ok_or(StoreError::NotFound)?;
        stored.position = position;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_button(&self, id: i64) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.buttons.iter().any(|b| b.id == id) {
            return Err(StoreError::NotFound);
        }
        state.metrics.retain(|m| m.button_id != id);
        state.buttons.retain(|b| b.id != id);
        Ok(())
    }

    async fn get_click_metric(&self, button_id: i64) -> StoreResult<Option<ClickMetric>> {
        let state = self.lock()?;
        state.check(FailPoint::MetricLookup(button_id))?;
        Ok(state
            .metrics
            .iter()
            .find(|m| m.button_id == button_id)
            .cloned())
    }

    async fn increment_click_metric(
        &self,
        button_id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<ClickMetric> {
        let mut state = self.lock()?;
        state.check(FailPoint::IncrementMetric)?;
        if let Some(metric) = state.metrics.iter_mut().find(|m| m.button_id == button_id) {
            metric.clicks += 1;
            metric.last_click_at = Some(at);
            return Ok(metric.clone());
        }

        let metric = ClickMetric {
            button_id,
            clicks: 1,
            last_click_at: Some(at),
        };
        state.metrics.push(metric.clone());
        Ok(metric)
    }

    async fn create_click_event(&self, event: NewClickEvent) -> StoreResult<ClickEvent> {
        let mut state = self.lock()?;
        state.check(FailPoint::CreateClickEvent)?;
        Ok(push_event(&mut state, event, Utc::now()))
    }

    async fn list_click_events(
        &self,
        button_ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ClickEvent>> {
        let mut events: Vec<ClickEvent> = self
            .lock()?
            .events
            .iter()
            .filter(|e| button_ids.contains(&e.button_id))
            .filter(|e| e.created_at >= from && e.created_at < to)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn utm_source_stats(&self, button_ids: &[i64]) -> StoreResult<BTreeMap<String, i64>> {
        let state = self.lock()?;
        state.check(FailPoint::UtmStats)?;
        Ok(count_by(&state.events, button_ids, |e| e.utm_source.as_str()))
    }

    async fn utm_medium_stats(&self, button_ids: &[i64]) -> StoreResult<BTreeMap<String, i64>> {
        let state = self.lock()?;
        state.check(FailPoint::UtmStats)?;
        Ok(count_by(&state.events, button_ids, |e| e.utm_medium.as_str()))
    }

    async fn get_stats(&self) -> StoreResult<AdminStats> {
        let state = self.lock()?;
        Ok(AdminStats {
            total_users: state.users.len() as i64,
            total_multilinks: state.multilinks.len() as i64,
            total_buttons: state.buttons.len() as i64,
            total_clicks: state.events.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let repo = InMemoryRepository::new();
        repo.create_user(new_user("alice")).await.unwrap();

        let err = repo.create_user(new_user("alice")).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict("users_username_key".to_string()));
    }

    #[tokio::test]
    async fn test_buttons_sorted_by_position_then_insertion() {
        let repo = InMemoryRepository::new();
        for (title, position) in [("a", 2), ("b", 1), ("c", 2)] {
            repo.create_button(NewButton {
                multilink_id: 1,
                title: title.to_string(),
                url: "https://example.com".to_string(),
                icon: String::new(),
                color: String::new(),
                position,
                is_active: true,
            })
            .await
            .unwrap();
        }

        let titles: Vec<String> = repo
            .list_buttons(1)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(titles, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_fail_point_is_cleared() {
        let repo = InMemoryRepository::new();
        repo.fail_on(FailPoint::IncrementMetric);
        assert!(repo.increment_click_metric(1, Utc::now()).await.is_err());

        repo.clear_failures();
        let metric = repo.increment_click_metric(1, Utc::now()).await.unwrap();
        assert_eq!(metric.clicks, 1);
    }
}
