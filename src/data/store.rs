//! User storage seam used by the login paths.

use async_trait::async_trait;

use super::models::{UpsertUser, User};
use crate::error::AppError;

/// Credential validation and profile persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Return the user whose email and password match, if any.
    async fn verify_credentials(&self, email: &str, password: &str)
    -> Result<Option<User>, AppError>;

    /// Insert or update a user by id and return the stored record.
    async fn upsert_user(&self, user: UpsertUser) -> Result<User, AppError>;
}
