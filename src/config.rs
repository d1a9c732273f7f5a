//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (`SESSIONAUTH__*`)
//! 4. Hosting-environment variables (`REPL_ID`, `REPLIT_DOMAINS`, `ISSUER_URL`,
//!    `SESSION_SECRET`, `DATABASE_URL`), which win over everything else
//!
//! The result is resolved once at startup and shared by reference.

use serde::Deserialize;

/// Issuer used when the hosting environment does not name one.
pub const DEFAULT_ISSUER_URL: &str = "https://replit.com/oidc";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 5000)
    pub port: u16,
}

/// Database configuration (SQLite)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string, e.g. `sqlite://data/app.db`
    pub url: String,
    pub max_connections: u32,
}

/// Where session records live
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    /// `sessions` table in the configured database
    #[default]
    Database,
    /// Process memory; sessions are lost on restart
    Memory,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign session cookies (32+ bytes)
    pub session_secret: String,
    /// Session lifetime in seconds (default: 604800 = 7 days)
    pub session_ttl_seconds: i64,
    /// Name of the session cookie
    pub cookie_name: String,
    /// Set the `Secure` attribute on the session cookie
    pub secure_cookies: bool,
    #[serde(default)]
    pub session_store: SessionStoreKind,
    /// How often expired session rows are deleted
    pub prune_interval_seconds: u64,
    /// How long discovered provider metadata stays fresh
    pub discovery_ttl_seconds: u64,
    /// Take the login host from `X-Forwarded-Host` (only behind a proxy that sets it)
    #[serde(default)]
    pub trust_proxy: bool,
    /// Present only when running inside the supported hosting environment
    pub oidc: Option<OidcConfig>,
}

/// Federated login configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// OAuth client identifier (the hosting marker doubles as the client id)
    pub client_id: String,
    /// Comma-separated list of hostnames allowed to start a login
    #[serde(default)]
    pub domains: String,
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,
}

impl OidcConfig {
    /// Allowed hostnames, trimmed and lowercased, empty entries dropped.
    pub fn allowed_domains(&self) -> Vec<String> {
        self.domains
            .split(',')
            .map(|domain| domain.trim().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect()
    }
}

fn default_issuer_url() -> String {
    DEFAULT_ISSUER_URL.to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Variables set by the hosting platform.
///
/// `repl_id` is the marker: when it is absent the federated path is disabled
/// and only password login is served.
#[derive(Debug, Clone, Default)]
pub struct HostingEnvironment {
    pub repl_id: Option<String>,
    pub domains: Option<String>,
    pub issuer_url: Option<String>,
    pub session_secret: Option<String>,
    pub database_url: Option<String>,
}

impl HostingEnvironment {
    /// Read the platform variables from the process environment.
    pub fn detect() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());
        Self {
            repl_id: var("REPL_ID"),
            domains: var("REPLIT_DOMAINS"),
            issuer_url: var("ISSUER_URL"),
            session_secret: var("SESSION_SECRET"),
            database_url: var("DATABASE_URL"),
        }
    }
}

impl AppConfig {
    /// Load configuration from files, `SESSIONAUTH__*` and the hosting environment.
    ///
    /// # Errors
    /// Returns error if configuration is missing or invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        Self::load_with(HostingEnvironment::detect())
    }

    /// Same as [`AppConfig::load`] with an explicit hosting environment.
    pub fn load_with(hosting: HostingEnvironment) -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("database.max_connections", 5)?
            .set_default("auth.session_ttl_seconds", 604800)?
            .set_default("auth.cookie_name", "sid")?
            .set_default("auth.secure_cookies", true)?
            .set_default("auth.prune_interval_seconds", 900)?
            .set_default("auth.discovery_ttl_seconds", 3600)?
            .set_default("auth.trust_proxy", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SESSIONAUTH")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("auth.session_secret", hosting.session_secret)?
            .set_override_option("database.url", hosting.database_url)?;

        // The remaining platform variables only mean something alongside the marker.
        let marker_present = hosting.repl_id.is_some();
        if let Some(repl_id) = hosting.repl_id {
            builder = builder
                .set_override("auth.oidc.client_id", repl_id)?
                .set_override_option("auth.oidc.domains", hosting.domains)?
                .set_override_option("auth.oidc.issuer_url", hosting.issuer_url)?;
        }

        let app_config: Self = builder
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        let app_config = app_config.gate_federated(marker_present);
        app_config.validate()?;
        Ok(app_config)
    }

    /// Drop federated settings that came from files or `SESSIONAUTH__*`
    /// when the hosting marker is absent.
    fn gate_federated(mut self, marker_present: bool) -> Self {
        if !marker_present {
            self.auth.oidc = None;
        }
        self
    }

    /// Default `EnvFilter` directives when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        format!("sessionauth={},tower_http=debug", self.logging.level)
    }

    /// Whether the federated login path is enabled for this process.
    pub fn federated_enabled(&self) -> bool {
        self.auth.oidc.is_some()
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_ttl_seconds <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if let Some(oidc) = &self.auth.oidc {
            if oidc.allowed_domains().is_empty() {
                return Err(crate::error::AppError::Config(
                    "REPLIT_DOMAINS must list at least one domain when REPL_ID is set".to_string(),
                ));
            }
            url::Url::parse(&oidc.issuer_url).map_err(|e| {
                crate::error::AppError::Config(format!("invalid issuer url {}: {e}", oidc.issuer_url))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
impl AppConfig {
    /// Federated-enabled configuration with an in-memory session store.
    pub(crate) fn for_tests() -> Self {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            auth: AuthConfig {
                session_secret: "x".repeat(32),
                session_ttl_seconds: 604_800,
                cookie_name: "sid".to_string(),
                secure_cookies: true,
                session_store: SessionStoreKind::Memory,
                prune_interval_seconds: 900,
                discovery_ttl_seconds: 3600,
                trust_proxy: false,
                oidc: Some(OidcConfig {
                    client_id: "repl-123".to_string(),
                    domains: "app.example.com".to_string(),
                    issuer_url: DEFAULT_ISSUER_URL.to_string(),
                }),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosting(repl_id: Option<&str>, domains: Option<&str>) -> HostingEnvironment {
        HostingEnvironment {
            repl_id: repl_id.map(str::to_string),
            domains: domains.map(str::to_string),
            issuer_url: None,
            session_secret: Some("s".repeat(40)),
            database_url: Some("sqlite::memory:".to_string()),
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(AppConfig::for_tests().validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_session_secret() {
        let mut config = AppConfig::for_tests();
        config.auth.session_secret = "short-secret".to_string();

        let error = config
            .validate()
            .expect_err("session secret shorter than 32 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("auth.session_secret")
        ));
    }

    #[test]
    fn validate_rejects_federated_without_domains() {
        let mut config = AppConfig::for_tests();
        if let Some(oidc) = config.auth.oidc.as_mut() {
            oidc.domains = " , ".to_string();
        }

        let error = config.validate().expect_err("empty domain list must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("REPLIT_DOMAINS")
        ));
    }

    #[test]
    fn allowed_domains_are_trimmed_and_lowercased() {
        let oidc = OidcConfig {
            client_id: "repl".to_string(),
            domains: "App.Example.com, other.example.com,,".to_string(),
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
        };
        assert_eq!(
            oidc.allowed_domains(),
            vec!["app.example.com".to_string(), "other.example.com".to_string()]
        );
    }

    #[test]
    fn hosting_marker_enables_federated_path() {
        let config = AppConfig::load_with(hosting(Some("repl-123"), Some("a.example.com")))
            .expect("config loads");
        let oidc = config.auth.oidc.as_ref().expect("federated config present");
        assert_eq!(oidc.client_id, "repl-123");
        assert_eq!(oidc.issuer_url, DEFAULT_ISSUER_URL);
        assert!(config.federated_enabled());
    }

    #[test]
    fn missing_marker_disables_federated_path() {
        let config =
            AppConfig::load_with(hosting(None, Some("a.example.com"))).expect("config loads");
        assert!(!config.federated_enabled());
        assert_eq!(config.auth.session_ttl_seconds, 604_800);
        assert!(!config.auth.trust_proxy);
    }

    #[test]
    fn log_filter_uses_configured_level() {
        let mut config = AppConfig::for_tests();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_filter(), "sessionauth=debug,tower_http=debug");
    }

    #[test]
    fn oidc_settings_without_marker_are_ignored() {
        let config = AppConfig::for_tests().gate_federated(false);
        assert!(config.auth.oidc.is_none());
        assert!(!config.federated_enabled());

        let config = AppConfig::for_tests().gate_federated(true);
        assert!(config.federated_enabled());
    }
}
