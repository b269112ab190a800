use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
};

/// authorize
///
/// The ownership guard: the principal may act on a resource only when it owns it.
/// Buttons are checked against the owner of their parent MultiLink. Admins get no
/// bypass here.
pub fn authorize(principal_id: i64, owner_id: i64) -> AppResult<()> {
    if principal_id == owner_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "resource belongs to another user".to_string(),
        ))
    }
}

/// require_admin
///
/// Guards the admin-designated operations only.
pub fn require_admin(user: &AuthUser) -> AppResult<()> {
    if user.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin privileges required".to_string()))
    }
}
