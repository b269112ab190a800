use url::Url;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        Button, ButtonPosition, CreateButtonRequest, CreateMultiLinkRequest, MultiLink,
        MultiLinkListResponse, MultiLinkResponse, NewButton, NewMultiLink, UpdateButtonRequest,
        UpdateMultiLinkRequest,
    },
    policy,
    repository::{RepositoryState, StoreError},
};

pub const SLUG_MIN_LEN: usize = 3;
pub const SLUG_MAX_LEN: usize = 30;
const TITLE_MAX_LEN: usize = 100;
const ALLOWED_URL_SCHEMES: [&str; 4] = ["http", "https", "mailto", "tel"];
// Upper bound on `-N` suffixes tried when deriving a free slug.
const MAX_SLUG_ATTEMPTS: usize = 1000;

/// LinkService
///
/// The MultiLink/Button aggregate. Every owner-facing method takes the
/// authenticated principal's id, loads the target, and runs the ownership guard
/// before touching anything.
#[derive(Clone)]
pub struct LinkService {
    repo: RepositoryState,
}

impl LinkService {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    // --- MultiLinks ---

    /// create_multilink
    ///
    /// An explicit slug must be free; a missing one is derived from the title.
    /// The existence check is only an early rejection, the store's unique
    /// constraint decides races.
    pub async fn create_multilink(
        &self,
        principal_id: i64,
        req: CreateMultiLinkRequest,
    ) -> AppResult<MultiLink> {
        req.validate()?;
        let title = required_title(&req.title)?;

        let slug = match req.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => {
                validate_slug(slug)?;
                if self.repo.slug_exists(slug, None).await? {
                    return Err(AppError::Conflict(format!("slug '{slug}' is already taken")));
                }
                slug.to_string()
            }
            _ => self.free_slug_for(&title).await?,
        };

        let multilink = self
            .repo
            .create_multilink(NewMultiLink {
                user_id: principal_id,
                title,
                description: req.description,
                slug,
                is_active: req.is_active,
            })
            .await?;

        tracing::info!(multilink_id = multilink.id, user_id = principal_id, slug = %multilink.slug, "multilink created");
        Ok(multilink)
    }

    pub async fn get_multilink(&self, principal_id: i64, id: i64) -> AppResult<MultiLinkResponse> {
        let multilink = self.owned_multilink(principal_id, id).await?;
        let buttons = self.repo.list_buttons(multilink.id).await?;
        Ok(MultiLinkResponse { multilink, buttons })
    }

    pub async fn list_multilinks(&self, principal_id: i64) -> AppResult<MultiLinkListResponse> {
        let multilinks = self.repo.list_multilinks_by_user(principal_id).await?;
        let total = multilinks.len();
        Ok(MultiLinkListResponse { multilinks, total })
    }

    /// get_public_multilink
    ///
    /// Anonymous slug lookup. Inactive pages are reported exactly like absent ones,
    /// and only active buttons are shown.
    pub async fn get_public_multilink(&self, slug: &str) -> AppResult<MultiLinkResponse> {
        let multilink = self
            .repo
            .get_multilink_by_slug(slug)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| AppError::NotFound(format!("multilink '{slug}'")))?;

        let buttons = self.repo.list_active_buttons(multilink.id).await?;
        Ok(MultiLinkResponse { multilink, buttons })
    }

    /// update_multilink
    ///
    /// Empty `title`/`slug` leave the stored values alone; `description` and
    /// `is_active` are always overwritten.
    pub async fn update_multilink(
        &self,
        principal_id: i64,
        id: i64,
        patch: UpdateMultiLinkRequest,
    ) -> AppResult<MultiLink> {
        let mut multilink = self.owned_multilink(principal_id, id).await?;

        if !patch.title.trim().is_empty() {
            multilink.title = required_title(&patch.title)?;
        }

        let slug = patch.slug.trim();
        if !slug.is_empty() && slug != multilink.slug {
            validate_slug(slug)?;
            if self.repo.slug_exists(slug, Some(multilink.id)).await? {
                return Err(AppError::Conflict(format!("slug '{slug}' is already taken")));
            }
            multilink.slug = slug.to_string();
        }

        multilink.description = patch.description;
        multilink.is_active = patch.is_active;

        Ok(self.repo.update_multilink(&multilink).await?)
    }

    /// delete_multilink
    ///
    /// Removes the page with its buttons and their click metrics as one unit.
    pub async fn delete_multilink(&self, principal_id: i64, id: i64) -> AppResult<()> {
        let multilink = self.owned_multilink(principal_id, id).await?;
        self.repo.delete_multilink_cascade(multilink.id).await?;
        tracing::info!(multilink_id = id, user_id = principal_id, "multilink deleted");
        Ok(())
    }

    // --- Buttons ---

    pub async fn list_buttons(&self, principal_id: i64, multilink_id: i64) -> AppResult<Vec<Button>> {
        let multilink = self.owned_multilink(principal_id, multilink_id).await?;
        Ok(self.repo.list_buttons(multilink.id).await?)
    }

    /// create_button
    ///
    /// A missing or zero position appends: `count(existing buttons) + 1` at
    /// creation time. Positions are never renumbered afterwards.
    pub async fn create_button(
        &self,
        principal_id: i64,
        multilink_id: i64,
        req: CreateButtonRequest,
    ) -> AppResult<Button> {
        let multilink = self.owned_multilink(principal_id, multilink_id).await?;

        req.validate()?;
        let title = required_title(&req.title)?;
        let url = validate_url(&req.url)?;

        let position = match req.position {
            Some(position) if position != 0 => position,
            _ => {
                let count = self.repo.count_buttons(multilink.id).await?;
                i32::try_from(count + 1)
                    .map_err(|_| AppError::InvalidInput("too many buttons".to_string()))?
            }
        };

        let button = self
            .repo
            .create_button(NewButton {
                multilink_id: multilink.id,
                title,
                url,
                icon: req.icon,
                color: req.color,
                position,
                is_active: req.is_active,
            })
            .await?;

        tracing::debug!(button_id = button.id, multilink_id, position, "button created");
        Ok(button)
    }

    /// update_button
    ///
    /// `title`/`url` change only when non-empty and `position` only when non-zero;
    /// `icon`, `color` and `is_active` are always overwritten.
    pub async fn update_button(
        &self,
        principal_id: i64,
        button_id: i64,
        patch: UpdateButtonRequest,
    ) -> AppResult<Button> {
        let mut button = self.owned_button(principal_id, button_id).await?;

        if !patch.title.trim().is_empty() {
            button.title = required_title(&patch.title)?;
        }
        if !patch.url.trim().is_empty() {
            button.url = validate_url(&patch.url)?;
        }
        if patch.position != 0 {
            button.position = patch.position;
        }
        button.icon = patch.icon;
        button.color = patch.color;
        button.is_active = patch.is_active;

        Ok(self.repo.update_button(&button).await?)
    }

    /// reorder_buttons
    ///
    /// Applies each `(id, position)` pair as its own write, in order. A failing
    /// entry stops the batch but leaves the earlier writes in place.
    pub async fn reorder_buttons(
        &self,
        principal_id: i64,
        multilink_id: i64,
        positions: Vec<ButtonPosition>,
    ) -> AppResult<Vec<Button>> {
        let multilink = self.owned_multilink(principal_id, multilink_id).await?;

        for (applied, entry) in positions.iter().enumerate() {
            if let Err(err) = self
                .repo
                .update_button_position(multilink.id, entry.id, entry.position)
                .await
            {
                tracing::warn!(
                    multilink_id,
                    button_id = entry.id,
                    applied,
                    error = %err,
                    "reorder stopped partway"
                );
                return Err(match err {
                    StoreError::NotFound => AppError::NotFound(format!(
                        "button {} in multilink {multilink_id}",
                        entry.id
                    )),
                    other => other.into(),
                });
            }
        }

        Ok(self.repo.list_buttons(multilink.id).await?)
    }

    pub async fn delete_button(&self, principal_id: i64, button_id: i64) -> AppResult<()> {
        let button = self.owned_button(principal_id, button_id).await?;
        self.repo.delete_button(button.id).await?;
        tracing::debug!(button_id, multilink_id = button.multilink_id, "button deleted");
        Ok(())
    }

    // --- Ownership resolution ---

    /// Loads a MultiLink and checks the principal owns it. Absent wins over foreign:
    /// a missing id is `NotFound`, someone else's is `Forbidden`.
    pub async fn owned_multilink(&self, principal_id: i64, id: i64) -> AppResult<MultiLink> {
        let multilink = self
            .repo
            .get_multilink(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("multilink {id}")))?;
        policy::authorize(principal_id, multilink.user_id)?;
        Ok(multilink)
    }

    /// Loads a Button and checks the principal owns its parent MultiLink.
    async fn owned_button(&self, principal_id: i64, button_id: i64) -> AppResult<Button> {
        let button = self
            .repo
            .get_button(button_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("button {button_id}")))?;
        self.owned_multilink(principal_id, button.multilink_id).await?;
        Ok(button)
    }

    async fn free_slug_for(&self, title: &str) -> AppResult<String> {
        let base = derive_slug(title);
        if !self.repo.slug_exists(&base, None).await? {
            return Ok(base);
        }

        for n in 2..MAX_SLUG_ATTEMPTS + 2 {
            let candidate = suffixed_slug(&base, n);
            if !self.repo.slug_exists(&candidate, None).await? {
                return Ok(candidate);
            }
        }

        Err(AppError::Conflict(format!(
            "no free slug derivable from '{title}'"
        )))
    }
}

fn required_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidInput("title is required".to_string()));
    }
    if title.chars().count() > TITLE_MAX_LEN {
        return Err(AppError::InvalidInput(format!(
            "title must be at most {TITLE_MAX_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

/// validate_slug
///
/// 3 to 30 characters drawn from ASCII letters, digits, `-` and `_`.
pub fn validate_slug(slug: &str) -> AppResult<()> {
    if !(SLUG_MIN_LEN..=SLUG_MAX_LEN).contains(&slug.len()) {
        return Err(AppError::InvalidInput(format!(
            "slug must be {SLUG_MIN_LEN}-{SLUG_MAX_LEN} characters"
        )));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::InvalidInput(
            "slug may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

/// validate_url
///
/// Accepts absolute http(s) URLs with a host, plus mailto: and tel: links.
/// Returns the parser's serialization, which is always a valid `Location` value.
pub fn validate_url(raw: &str) -> AppResult<String> {
    let raw = raw.trim();
    let parsed = Url::parse(raw).map_err(|e| AppError::InvalidUrl(format!("{raw}: {e}")))?;

    if !ALLOWED_URL_SCHEMES.contains(&parsed.scheme()) {
        return Err(AppError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_none_or(str::is_empty) {
        return Err(AppError::InvalidUrl(format!("{raw}: missing host")));
    }

    Ok(parsed.into())
}

/// derive_slug
///
/// Lowercases the title, keeps ASCII alphanumerics and joins the runs with `-`,
/// then pads or truncates the result into the slug length bounds.
pub fn derive_slug(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let mut slug = truncate_slug(&slug, SLUG_MAX_LEN);
    if slug.is_empty() {
        slug = "page".to_string();
    } else if slug.len() < SLUG_MIN_LEN {
        slug.push_str("-page");
    }
    slug
}

fn suffixed_slug(base: &str, n: usize) -> String {
    let suffix = format!("-{n}");
    let stem = truncate_slug(base, SLUG_MAX_LEN - suffix.len());
    format!("{stem}{suffix}")
}

// Slugs are ASCII here, so byte truncation is char-safe.
fn truncate_slug(slug: &str, max: usize) -> String {
    let cut = &slug[..slug.len().min(max)];
    cut.trim_matches('-').to_string()
}
