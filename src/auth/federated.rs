//! Federated (OIDC) login orchestration
//!
//! Ties the provider client, discovery cache and per-domain strategies
//! together: starting a login, completing the callback, refreshing stale
//! principals and building the logout redirect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::discovery::DiscoveryCache;
use super::oidc::{self, CodeExchange, IdentityProvider, OidcError, TokenSet};
use super::pkce;
use super::principal::FederatedPrincipal;
use super::session::PendingLogin;
use super::strategy::StrategyRegistry;
use crate::config::OidcConfig;
use crate::error::AppError;

pub struct FederatedAuth {
    client_id: String,
    strategies: StrategyRegistry,
    discovery: DiscoveryCache,
    provider: Arc<dyn IdentityProvider>,
}

/// A login redirect and the state to remember until the callback.
#[derive(Debug)]
pub struct LoginRedirect {
    pub url: String,
    pub pending: PendingLogin,
}

impl FederatedAuth {
    pub fn new(config: &OidcConfig, provider: Arc<dyn IdentityProvider>, discovery_ttl: Duration) -> Self {
        let strategies = StrategyRegistry::new(config.allowed_domains());
        Self {
            client_id: config.client_id.clone(),
            strategies,
            discovery: DiscoveryCache::new(provider.clone()).with_ttl(discovery_ttl),
            provider,
        }
    }

    /// Build the federated path and warm the discovery cache.
    ///
    /// A discovery failure is logged, not returned: password login keeps
    /// working and discovery is retried on the next federated request.
    pub async fn setup(
        config: &OidcConfig,
        provider: Arc<dyn IdentityProvider>,
        discovery_ttl: Duration,
    ) -> Self {
        let federated = Self::new(config, provider, discovery_ttl);

        match federated.discovery.get().await {
            Ok(metadata) => tracing::info!(
                issuer = %metadata.issuer,
                domains = config.allowed_domains().len(),
                "Federated login enabled"
            ),
            Err(error) => tracing::warn!(
                %error,
                issuer = %config.issuer_url,
                "OIDC discovery failed at startup; federated login unavailable until the provider responds"
            ),
        }

        federated
    }

    /// Start a login for the strategy matching `host`.
    pub async fn begin_login(
        &self,
        host: &str,
        return_to: Option<String>,
    ) -> Result<LoginRedirect, AppError> {
        let strategy = self.strategies.for_host(host)?;
        let metadata = self.discovery.get().await.map_err(|error| {
            tracing::warn!(%error, "Cannot start federated login");
            AppError::ServiceUnavailable
        })?;

        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let url = oidc::authorization_url(
            &metadata,
            &self.client_id,
            &strategy.callback_url,
            &state,
            &pkce::code_challenge(&code_verifier),
        )
        .map_err(|e| AppError::internal("Login failed", e))?;

        Ok(LoginRedirect {
            url,
            pending: PendingLogin {
                strategy: strategy.name.clone(),
                state,
                code_verifier,
                return_to: return_to.filter(|path| is_local_path(path)),
            },
        })
    }

    /// Finish the authorization-code flow and build the principal.
    pub async fn complete_login(
        &self,
        pending: &PendingLogin,
        code: &str,
    ) -> Result<FederatedPrincipal, OidcError> {
        let strategy = self
            .strategies
            .by_name(&pending.strategy)
            .ok_or_else(|| OidcError::Discovery(format!("unknown strategy {}", pending.strategy)))?;
        let metadata = self.discovery.get().await?;

        let tokens = self
            .provider
            .exchange_code(
                &metadata,
                CodeExchange {
                    code: code.to_string(),
                    redirect_uri: strategy.callback_url.clone(),
                    code_verifier: pending.code_verifier.clone(),
                },
            )
            .await?;

        let id_token = tokens.id_token.as_deref().ok_or(OidcError::MissingIdToken)?;
        let claims = oidc::id_token_claims(id_token, &metadata.issuer, &self.client_id)?;

        Ok(FederatedPrincipal {
            expires_at: claims.exp,
            claims,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
    }

    /// Redeem the principal's refresh token and overwrite its tokens in place.
    pub async fn refresh(&self, principal: &mut FederatedPrincipal) -> Result<(), OidcError> {
        let refresh_token = principal
            .refresh_token
            .clone()
            .ok_or(OidcError::MissingRefreshToken)?;
        let metadata = self.discovery.get().await?;
        let tokens = self.provider.refresh(&metadata, &refresh_token).await?;

        apply_refreshed_tokens(principal, tokens, &metadata.issuer, &self.client_id)
    }

    /// Where to send the browser after a local logout.
    ///
    /// `None` when provider metadata or its end-session endpoint is unavailable.
    pub async fn end_session_url(&self, host: &str) -> Option<String> {
        let metadata = self.discovery.get().await.ok()?;
        let post_logout = format!("https://{}", super::strategy::hostname(host));
        oidc::end_session_url(&metadata, &self.client_id, &post_logout)
    }
}

fn apply_refreshed_tokens(
    principal: &mut FederatedPrincipal,
    tokens: TokenSet,
    issuer: &str,
    client_id: &str,
) -> Result<(), OidcError> {
    let claims = tokens
        .id_token
        .as_deref()
        .map(|id_token| oidc::id_token_claims(id_token, issuer, client_id))
        .transpose()?;

    // Without a new expiry the principal would stay stale
    let expires_at = match (&claims, tokens.expires_in) {
        (Some(claims), _) => claims.exp,
        (None, Some(expires_in)) => Utc::now().timestamp() + expires_in,
        (None, None) => return Err(OidcError::MissingIdToken),
    };

    principal.access_token = tokens.access_token;
    if let Some(refresh_token) = tokens.refresh_token {
        principal.refresh_token = Some(refresh_token);
    }
    if let Some(claims) = claims {
        principal.claims = claims;
    }
    principal.expires_at = expires_at;

    Ok(())
}

/// Only same-origin absolute paths are accepted as post-login targets.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}
