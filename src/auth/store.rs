//! Session storage
//!
//! Sessions are opaque JSON blobs keyed by session id with an absolute
//! expiry. The durable implementation lives in [`crate::data::Database`];
//! [`MemorySessionStore`] keeps them in process memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use super::session::SessionData;

/// Error type for session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Persistence for session records.
///
/// Stores must give read-your-writes within a request; nothing here locks
/// across requests, so concurrent writers to one session race and the last
/// write wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; expired or unknown ids yield `None`.
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, StoreError>;

    /// Insert or replace a session.
    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove a session. Removing an unknown id is not an error.
    async fn destroy(&self, session_id: &str) -> Result<(), StoreError>;

    /// Delete expired sessions and return how many were removed.
    async fn prune_expired(&self) -> Result<u64, StoreError>;
}

/// In-memory session store backed by Moka.
///
/// Entries are evicted once their own expiry passes or after `max_ttl`,
/// whichever comes first.
pub struct MemorySessionStore {
    sessions: Cache<String, (SessionData, DateTime<Utc>)>,
}

impl MemorySessionStore {
    pub fn new(max_ttl: Duration) -> Self {
        let sessions = Cache::builder().time_to_live(max_ttl).build();
        Self { sessions }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        match self.sessions.get(session_id).await {
            Some((data, expires_at)) if expires_at > Utc::now() => Ok(Some(data)),
            Some(_) => {
                self.sessions.invalidate(session_id).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.sessions
            .insert(session_id.to_string(), (data.clone(), expires_at))
            .await;
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.invalidate(session_id).await;
        Ok(())
    }

    async fn prune_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at <= now)
            .map(|(id, _)| id.as_ref().clone())
            .collect();

        for id in &expired {
            self.sessions.invalidate(id).await;
        }
        Ok(expired.len() as u64)
    }
}

/// Periodically delete expired sessions from `store`.
///
/// The first sweep runs one full interval after startup.
pub fn spawn_prune_task(
    store: Arc<dyn SessionStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        interval.tick().await;

        loop {
            interval.tick().await;
            match store.prune_expired().await {
                Ok(0) => tracing::trace!("No expired sessions to prune"),
                Ok(removed) => tracing::info!(removed, "Pruned expired sessions"),
                Err(error) => tracing::error!(%error, "Session prune failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::User;

    fn demo_session() -> SessionData {
        SessionData {
            user: Some(User {
                id: "u1".to_string(),
                email: Some("demo@example.com".to_string()),
                first_name: Some("Demo".to_string()),
                last_name: None,
                profile_image_url: None,
            }),
            ..SessionData::default()
        }
    }

    #[tokio::test]
    async fn save_then_load_returns_payload() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let expires_at = Utc::now() + chrono::Duration::minutes(5);
        store.save("abc", &demo_session(), expires_at).await.unwrap();

        let loaded = store.load("abc").await.unwrap().expect("session present");
        assert_eq!(loaded.user.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.save("old", &demo_session(), expires_at).await.unwrap();

        assert!(store.load("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroy_removes_session() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let expires_at = Utc::now() + chrono::Duration::minutes(5);
        store.save("abc", &demo_session(), expires_at).await.unwrap();
        store.destroy("abc").await.unwrap();
        store.destroy("never-existed").await.unwrap();

        assert!(store.load("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_counts_only_expired() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let now = Utc::now();
        store
            .save("live", &demo_session(), now + chrono::Duration::minutes(5))
            .await
            .unwrap();
        store
            .save("dead", &demo_session(), now - chrono::Duration::minutes(5))
            .await
            .unwrap();
        store.sessions.run_pending_tasks().await;

        assert_eq!(store.prune_expired().await.unwrap(), 1);
        assert!(store.load("live").await.unwrap().is_some());
    }
}
