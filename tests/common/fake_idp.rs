//! Minimal OpenID provider served by axum for E2E tests
//!
//! Issues HS256 id tokens for a fixed subject. Token lifetime and refresh
//! behaviour are adjustable per test.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsonwebtoken::{EncodingKey, Header};
use tokio::net::TcpListener;

use super::CLIENT_ID;

pub const SUBJECT: &str = "fed-user-1";
pub const EMAIL: &str = "fed@example.com";

struct IdpState {
    issuer: String,
    /// Seconds added to "now" for the `exp` of issued id tokens
    token_lifetime: AtomicI64,
    reject_refresh: AtomicBool,
    code_exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

pub struct FakeIdp {
    pub issuer: String,
    state: Arc<IdpState>,
}

impl FakeIdp {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let issuer = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(IdpState {
            issuer: issuer.clone(),
            token_lifetime: AtomicI64::new(3600),
            reject_refresh: AtomicBool::new(false),
            code_exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/token", post(token))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { issuer, state }
    }

    /// Lifetime of id tokens issued from now on (may be negative).
    pub fn set_token_lifetime(&self, seconds: i64) {
        self.state.token_lifetime.store(seconds, Ordering::SeqCst);
    }

    /// Make the token endpoint reject refresh grants.
    pub fn reject_refresh(&self) {
        self.state.reject_refresh.store(true, Ordering::SeqCst);
    }

    pub fn code_exchanges(&self) -> usize {
        self.state.code_exchanges.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.state.refreshes.load(Ordering::SeqCst)
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Json<serde_json::Value> {
    let issuer = &state.issuer;
    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/auth"),
        "token_endpoint": format!("{issuer}/token"),
        "end_session_endpoint": format!("{issuer}/session/end"),
        "jwks_uri": format!("{issuer}/jwks"),
    }))
}

#[derive(serde::Deserialize)]
struct TokenForm {
    grant_type: String,
    client_id: String,
    #[serde(default)]
    code_verifier: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn token(State(state): State<Arc<IdpState>>, Form(form): Form<TokenForm>) -> Response {
    if form.client_id != CLIENT_ID {
        return invalid_grant("unknown client");
    }

    match form.grant_type.as_str() {
        "authorization_code" => {
            if form.code_verifier.as_deref().unwrap_or_default().len() < 43 {
                return invalid_grant("missing PKCE verifier");
            }
            state.code_exchanges.fetch_add(1, Ordering::SeqCst);
            Json(token_response(&state, "refresh-1")).into_response()
        }
        "refresh_token" => {
            if state.reject_refresh.load(Ordering::SeqCst) || form.refresh_token.is_none() {
                return invalid_grant("refresh token revoked");
            }
            state.refreshes.fetch_add(1, Ordering::SeqCst);
            // Refreshed tokens are always valid for an hour
            state.token_lifetime.store(3600, Ordering::SeqCst);
            Json(token_response(&state, "refresh-2")).into_response()
        }
        _ => invalid_grant("unsupported grant type"),
    }
}

fn token_response(state: &IdpState, refresh_token: &str) -> serde_json::Value {
    let lifetime = state.token_lifetime.load(Ordering::SeqCst);
    let id_token = jsonwebtoken::encode(
        &Header::default(),
        &serde_json::json!({
            "iss": state.issuer,
            "aud": CLIENT_ID,
            "sub": SUBJECT,
            "email": EMAIL,
            "first_name": "Fed",
            "last_name": "User",
            "exp": chrono::Utc::now().timestamp() + lifetime,
        }),
        &EncodingKey::from_secret(b"fake-idp-signing-key"),
    )
    .unwrap();

    serde_json::json!({
        "access_token": format!("access-{}", rand::random::<u32>()),
        "refresh_token": refresh_token,
        "id_token": id_token,
        "token_type": "Bearer",
        "expires_in": lifetime,
    })
}

fn invalid_grant(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": description,
        })),
    )
        .into_response()
}
