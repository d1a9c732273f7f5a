//! Per-domain login strategies
//!
//! Each allowed hostname gets its own strategy so the callback URL handed to
//! the provider always points back at the host the login started on.

use std::collections::HashMap;

use crate::error::AppError;

const STRATEGY_PREFIX: &str = "replitauth";

/// Login strategy bound to one hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub name: String,
    pub domain: String,
    pub callback_url: String,
}

impl Strategy {
    pub fn for_domain(domain: &str) -> Self {
        Self {
            name: format!("{STRATEGY_PREFIX}:{domain}"),
            domain: domain.to_string(),
            callback_url: format!("https://{domain}/api/callback"),
        }
    }
}

/// Strategies keyed by hostname.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    by_domain: HashMap<String, Strategy>,
}

impl StrategyRegistry {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let by_domain = domains
            .into_iter()
            .map(|domain| {
                let domain = domain.as_ref().to_ascii_lowercase();
                (domain.clone(), Strategy::for_domain(&domain))
            })
            .collect();
        Self { by_domain }
    }

    /// Strategy for a `Host` header value (port ignored).
    pub fn for_host(&self, host: &str) -> Result<&Strategy, AppError> {
        let hostname = hostname(host);
        self.by_domain.get(&hostname).ok_or_else(|| {
            tracing::warn!(host = %host, "No login strategy registered for host");
            AppError::BadRequest(format!("Unknown authentication strategy for host {hostname}"))
        })
    }

    /// Look up a strategy by the name stored in a pending login.
    pub fn by_name(&self, name: &str) -> Option<&Strategy> {
        self.by_domain.values().find(|strategy| strategy.name == name)
    }
}

/// Lowercased hostname without port; IPv6 brackets are kept.
pub fn hostname(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.split_once(']') {
            Some((addr, _)) => return format!("[{}]", addr.to_ascii_lowercase()),
            None => host,
        }
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host, |(name, _)| name)
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}
