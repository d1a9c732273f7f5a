//! SQLite database operations
//!
//! Backs both the user store and the durable session store.
//! The `users` table is migrated on connect; the `sessions` table is
//! provisioned by the operator (see `sql/sessions.sql`) and only verified here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use super::models::{UpsertUser, User};
use super::store::UserStore;
use crate::auth::session::SessionData;
use crate::auth::store::{SessionStore, StoreError};
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to `url` and run the bundled migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::internal("Database migration failed", e))?;

        tracing::info!("Database connected and migrated successfully");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Fail unless the `sessions` table already exists.
    pub async fn ensure_sessions_table(&self) -> Result<(), AppError> {
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sessions'",
        )
        .fetch_optional(&self.pool)
        .await?;

        if exists.is_none() {
            return Err(AppError::Config(
                "sessions table is missing; create it with sql/sessions.sql".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert a user that can log in with a password.
    ///
    /// `password_hash` must be a bcrypt hash.
    pub async fn create_password_user(
        &self,
        user: &UpsertUser,
        password_hash: &str,
    ) -> Result<User, AppError> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, first_name, last_name, profile_image_url, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, email, first_name, last_name, profile_image_url",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.profile_image_url)
        .bind(password_hash)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, first_name, last_name, profile_image_url FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for Database {
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, profile_image_url, password_hash
             FROM users WHERE lower(email) = lower(?)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(password_hash) = row.try_get::<Option<String>, _>("password_hash")? else {
            // Federated-only accounts have no password.
            return Ok(None);
        };

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &password_hash))
            .await
            .map_err(|e| AppError::internal("Login failed", e))?
            .map_err(|e| AppError::internal("Login failed", e))?;

        if !matches {
            return Ok(None);
        }

        Ok(Some(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            profile_image_url: row.try_get("profile_image_url")?,
        }))
    }

    async fn upsert_user(&self, user: UpsertUser) -> Result<User, AppError> {
        let now = Utc::now().to_rfc3339();
        let stored = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, first_name, last_name, profile_image_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                profile_image_url = excluded.profile_image_url,
                updated_at = excluded.updated_at
             RETURNING id, email, first_name, last_name, profile_image_url",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.profile_image_url)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(user_id = %stored.id, "User upserted");
        Ok(stored)
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT sess FROM sessions WHERE sid = ? AND expire > ?")
                .bind(session_id)
                .bind(Utc::now().timestamp())
                .fetch_optional(&self.pool)
                .await?;

        payload
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(data)?;
        sqlx::query(
            "INSERT INTO sessions (sid, sess, expire) VALUES (?, ?, ?)
             ON CONFLICT(sid) DO UPDATE SET sess = excluded.sess, expire = excluded.expire",
        )
        .bind(session_id)
        .bind(payload)
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE sid = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prune_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expire <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
