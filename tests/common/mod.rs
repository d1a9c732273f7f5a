//! Common test utilities for E2E tests

#![allow(dead_code)]

pub mod fake_idp;

use sessionauth::data::{Database, UpsertUser};
use sessionauth::{AppState, config};
use sqlx::Executor;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub use fake_idp::FakeIdp;

pub const CLIENT_ID: &str = "test-repl-id";
pub const DEMO_EMAIL: &str = "demo@example.com";
pub const DEMO_PASSWORD: &str = "demo-password";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub db: Database,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Password login only (no hosting marker)
    pub async fn new() -> Self {
        Self::start(None).await
    }

    /// Federated login against `issuer_url`, allowed for host `127.0.0.1`
    pub async fn with_issuer(issuer_url: &str) -> Self {
        Self::start(Some(issuer_url.to_string())).await
    }

    async fn start(issuer_url: Option<String>) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_url = format!("sqlite://{}", temp_dir.path().join("test.db").display());

        // The sessions table is provisioned outside the service
        let db = Database::connect(&db_url, 1).await.unwrap();
        db.pool()
            .execute(include_str!("../../sql/sessions.sql"))
            .await
            .unwrap();
        seed_demo_user(&db).await;

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            database: config::DatabaseConfig {
                url: db_url,
                max_connections: 2,
            },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-that-is-32-bytes!!".to_string(),
                session_ttl_seconds: 3600,
                cookie_name: "sid".to_string(),
                secure_cookies: false,
                session_store: config::SessionStoreKind::Database,
                prune_interval_seconds: 900,
                discovery_ttl_seconds: 3600,
                trust_proxy: false,
                oidc: issuer_url.map(|issuer_url| config::OidcConfig {
                    client_id: CLIENT_ID.to_string(),
                    domains: "127.0.0.1".to_string(),
                    issuer_url,
                }),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = sessionauth::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            db,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// POST /api/login with the given credentials
    pub async fn password_login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap()
    }

    /// GET /api/auth/user, optionally with a session cookie
    pub async fn current_user(&self, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url("/api/auth/user"));
        if let Some(cookie) = cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    /// Run the federated login through the callback and return the session cookie.
    pub async fn federated_login(&self) -> String {
        let response = self.client.get(self.url("/api/login")).send().await.unwrap();
        assert_eq!(response.status(), 303);
        let cookie = session_cookie(&response).expect("pending login cookie");
        let state = query_param(&location(&response), "state").expect("state parameter");

        let response = self
            .client
            .get(self.url(&format!("/api/callback?code=auth-code&state={state}")))
            .header(reqwest::header::COOKIE, &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 303);
        assert_eq!(location(&response), "/");

        session_cookie(&response).expect("session cookie after callback")
    }
}

async fn seed_demo_user(db: &Database) {
    let hash = bcrypt::hash(DEMO_PASSWORD, 4).unwrap();
    db.create_password_user(
        &UpsertUser {
            id: "demo-user".to_string(),
            email: Some(DEMO_EMAIL.to_string()),
            first_name: Some("Demo".to_string()),
            last_name: Some("User".to_string()),
            profile_image_url: None,
        },
        &hash,
    )
    .await
    .unwrap();
}

/// `name=value` of the session cookie set by `response`, if any
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("sid=") && !value.starts_with("sid=;"))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
