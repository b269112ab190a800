use validator::Validate;

use crate::{
    auth::{self, TokenService},
    error::{AppError, AppResult},
    models::{
        AuthResponse, LoginRequest, NewUser, PublicProfile, RegisterRequest, UpdateUserRequest,
        User,
    },
    repository::RepositoryState,
};

/// AccountService
///
/// Registration, login and self-service profile management. Holds its store
/// handle and the token service it issues sessions with.
#[derive(Clone)]
pub struct AccountService {
    repo: RepositoryState,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(repo: RepositoryState, tokens: TokenService) -> Self {
        Self { repo, tokens }
    }

    /// register
    ///
    /// Validates the payload, rejects taken emails/usernames early, stores an
    /// Argon2 hash and returns a fresh session. The store's unique constraints
    /// still catch a concurrent registration that slips past the pre-check.
    pub async fn register(&self, req: RegisterRequest) -> AppResult<AuthResponse> {
        req.validate()?;

        if self.repo.get_user_by_email(&req.email).await?.is_some() {
            return Err(AppError::Conflict("email already registered".to_string()));
        }
        if self.repo.get_user_by_username(&req.username).await?.is_some() {
            return Err(AppError::Conflict("username already taken".to_string()));
        }

        let password_hash = auth::hash_password(&req.password)?;
        let user = self
            .repo
            .create_user(NewUser {
                username: req.username,
                email: req.email,
                password_hash,
            })
            .await?;

        tracing::info!(user_id = user.id, username = %user.username, "user registered");
        self.session(user)
    }

    /// login
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, req: LoginRequest) -> AppResult<AuthResponse> {
        req.validate()?;

        let rejected = || AppError::Unauthenticated("invalid email or password".to_string());

        let user = self
            .repo
            .get_user_by_email(&req.email)
            .await?
            .ok_or_else(rejected)?;

        if !auth::verify_password(&req.password, &user.password_hash)? {
            tracing::info!(user_id = user.id, "login rejected: wrong password");
            return Err(rejected());
        }

        self.session(user)
    }

    pub async fn me(&self, principal_id: i64) -> AppResult<User> {
        self.repo
            .get_user(principal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {principal_id}")))
    }

    /// update_me
    ///
    /// Applies the non-empty fields of `patch` to the caller's own account.
    pub async fn update_me(&self, principal_id: i64, patch: UpdateUserRequest) -> AppResult<User> {
        patch.validate()?;

        let mut user = self.me(principal_id).await?;

        if let Some(username) = patch.username.filter(|u| *u != user.username) {
            if self.repo.get_user_by_username(&username).await?.is_some() {
                return Err(AppError::Conflict("username already taken".to_string()));
            }
            user.username = username;
        }

        if let Some(email) = patch.email.filter(|e| *e != user.email) {
            if self.repo.get_user_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict("email already registered".to_string()));
            }
            user.email = email;
        }

        if let Some(password) = patch.password {
            user.password_hash = auth::hash_password(&password)?;
        }

        Ok(self.repo.update_user(&user).await?)
    }

    pub async fn public_profile(&self, username: &str) -> AppResult<PublicProfile> {
        let user = self
            .repo
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {username}")))?;

        Ok(PublicProfile {
            username: user.username,
            created_at: user.created_at,
        })
    }

    fn session(&self, user: User) -> AppResult<AuthResponse> {
        let (token, expires_at) = self.tokens.issue(&user)?;
        Ok(AuthResponse {
            token,
            user,
            expires_at,
        })
    }
}
