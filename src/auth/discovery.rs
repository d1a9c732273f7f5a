//! Process-wide cache of provider metadata.
//!
//! Metadata is fresh for `ttl` (one hour by default). A refetch runs under a
//! single async mutex so concurrent first requests share one network call.
//! Stale metadata is served if a refetch fails; with nothing cached, a failure
//! is remembered for `retry_after` before discovery is attempted again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use super::oidc::{IdentityProvider, OidcError, ProviderMetadata};
use crate::metrics::DISCOVERY_FETCH_TOTAL;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

struct CacheEntry {
    metadata: Arc<ProviderMetadata>,
    fetched_at: Instant,
}

pub struct DiscoveryCache {
    provider: Arc<dyn IdentityProvider>,
    ttl: Duration,
    retry_after: Duration,
    entry: RwLock<Option<CacheEntry>>,
    last_failure: RwLock<Option<Instant>>,
    fetch_lock: Mutex<()>,
}

impl DiscoveryCache {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            ttl: DEFAULT_TTL,
            retry_after: DEFAULT_RETRY_AFTER,
            entry: RwLock::new(None),
            last_failure: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Current metadata, fetching it if missing or stale.
    pub async fn get(&self) -> Result<Arc<ProviderMetadata>, OidcError> {
        if let Some(metadata) = self.fresh().await {
            return Ok(metadata);
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have finished the fetch while we waited.
        if let Some(metadata) = self.fresh().await {
            return Ok(metadata);
        }

        let stale = self
            .entry
            .read()
            .await
            .as_ref()
            .map(|entry| entry.metadata.clone());

        if stale.is_none() && self.cooling_down().await {
            return Err(OidcError::Unavailable);
        }

        match self.provider.discover().await {
            Ok(metadata) => {
                DISCOVERY_FETCH_TOTAL.with_label_values(&["success"]).inc();
                let metadata = Arc::new(metadata);
                *self.entry.write().await = Some(CacheEntry {
                    metadata: metadata.clone(),
                    fetched_at: Instant::now(),
                });
                *self.last_failure.write().await = None;
                tracing::info!(issuer = %metadata.issuer, "OIDC provider metadata refreshed");
                Ok(metadata)
            }
            Err(error) => {
                DISCOVERY_FETCH_TOTAL.with_label_values(&["failure"]).inc();
                *self.last_failure.write().await = Some(Instant::now());
                match stale {
                    Some(metadata) => {
                        tracing::warn!(%error, "OIDC discovery failed; serving stale metadata");
                        Ok(metadata)
                    }
                    None => {
                        tracing::warn!(%error, "OIDC discovery failed");
                        Err(error)
                    }
                }
            }
        }
    }

    async fn fresh(&self) -> Option<Arc<ProviderMetadata>> {
        self.entry
            .read()
            .await
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.metadata.clone())
    }

    async fn cooling_down(&self) -> bool {
        self.last_failure
            .read()
            .await
            .is_some_and(|failed_at| failed_at.elapsed() < self.retry_after)
    }
}
