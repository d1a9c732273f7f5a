//! Login, logout and current-user endpoints
//!
//! Mounted under `/api`. The password routes are always served; the
//! federated routes exist only when the process runs with OIDC configured.

use anyhow::{Context, anyhow, bail};
use axum::{
    Json, RequestPartsExt, Router, async_trait,
    extract::{FromRequestParts, Query, State, rejection::JsonRejection},
    http::{HeaderMap, request::Parts},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::{TypedHeader, extract::CookieJar, headers::Host};
use serde::Deserialize;
use std::sync::Arc;

use crate::AppState;
use crate::auth::{CurrentUser, FederatedAuth, Session, require_auth};
use crate::error::AppError;
use crate::metrics::LOGIN_ATTEMPTS_TOTAL;

/// Where failed federated logins are sent to start over.
const LOGIN_PATH: &str = "/api/login";

// User-facing messages of the password routes
const CREDENTIALS_REQUIRED: &str = "Email and password are required";
const LOGIN_SUCCESSFUL: &str = "Login successful";
const LOGOUT_SUCCESSFUL: &str = "Logout successful";

/// Create authentication router
///
/// Routes:
/// - POST /login - Password login
/// - POST /logout - Destroy session
/// - GET /auth/user - Current identity
/// - GET /login - Redirect to identity provider (federated only)
/// - GET /callback - Authorization code callback (federated only)
/// - GET /logout - Provider logout (federated only)
pub fn auth_router(state: &AppState) -> Router<AppState> {
    let mut login = post(password_login);
    let mut logout = post(password_logout);
    if state.federated.is_some() {
        login = login.get(federated_login);
        logout = logout.get(federated_logout);
    }

    let protected = Router::new()
        .route("/auth/user", get(current_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let router = Router::new()
        .route("/login", login)
        .route("/logout", logout)
        .merge(protected);

    if state.federated.is_some() {
        router.route("/callback", get(callback))
    } else {
        router
    }
}

fn federated(state: &AppState) -> Result<&Arc<FederatedAuth>, AppError> {
    state.federated.as_ref().ok_or(AppError::ServiceUnavailable)
}

/// Host the request was addressed to, used to pick the login strategy.
///
/// Behind a trusted proxy (`auth.trust_proxy`) the first `X-Forwarded-Host`
/// value takes precedence over `Host`.
struct RequestHost(String);

#[async_trait]
impl FromRequestParts<AppState> for RequestHost {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if state.config.auth.trust_proxy {
            if let Some(host) = forwarded_host(&parts.headers) {
                return Ok(RequestHost(host));
            }
        }

        let TypedHeader(host) = parts
            .extract::<TypedHeader<Host>>()
            .await
            .map_err(|_| AppError::BadRequest("Missing Host header".to_string()))?;
        Ok(RequestHost(host.hostname().to_string()))
    }
}

fn forwarded_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// =============================================================================
// Password login
// =============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// POST /login
///
/// A body that is absent or not a JSON object of strings counts as missing
/// credentials.
async fn password_login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.map_err(|rejection| {
        tracing::debug!(%rejection, "Unreadable login body");
        AppError::BadRequest(CREDENTIALS_REQUIRED.to_string())
    })?;

    let email = body.email.as_deref().map(str::trim).unwrap_or_default();
    let password = body.password.as_deref().unwrap_or_default();
    if email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(CREDENTIALS_REQUIRED.to_string()));
    }

    let Some(user) = state.users.verify_credentials(email, password).await? else {
        LOGIN_ATTEMPTS_TOTAL
            .with_label_values(&["password", "failure"])
            .inc();
        tracing::info!("Password login rejected");
        return Err(AppError::Unauthorized);
    };

    let mut session = Session::load(&jar, &state).await?;
    session.regenerate(&state).await?;
    session.data.user = Some(user.clone());
    let jar = session.save_with_cookie(&state, jar).await?;

    LOGIN_ATTEMPTS_TOTAL
        .with_label_values(&["password", "success"])
        .inc();
    tracing::info!(user_id = %user.id, "Password login succeeded");

    Ok((
        jar,
        Json(serde_json::json!({
            "user": user,
            "message": LOGIN_SUCCESSFUL,
        })),
    ))
}

/// POST /logout
async fn password_logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let session = Session::load(&jar, &state).await?;
    let jar = session.destroy(&state, jar).await?;

    Ok((
        jar,
        Json(serde_json::json!({ "message": LOGOUT_SUCCESSFUL })),
    ))
}

// =============================================================================
// Current user
// =============================================================================

/// GET /auth/user
async fn current_user(CurrentUser(identity): CurrentUser) -> Json<serde_json::Value> {
    Json(identity.to_json())
}

// =============================================================================
// Federated login
// =============================================================================

#[derive(Debug, Deserialize)]
struct FederatedLoginQuery {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

/// GET /login
///
/// Remembers state and PKCE verifier in the session, then redirects to the
/// provider's authorization endpoint for the strategy matching the request host.
async fn federated_login(
    State(state): State<AppState>,
    RequestHost(host): RequestHost,
    Query(query): Query<FederatedLoginQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let federated = federated(&state)?;
    let redirect = federated.begin_login(&host, query.return_to).await?;

    let mut session = Session::load(&jar, &state).await?;
    session.data.pending_login = Some(redirect.pending);
    let jar = session.save_with_cookie(&state, jar).await?;

    Ok((jar, Redirect::to(&redirect.url)))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /callback
///
/// Any failure sends the browser back to the login route.
async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    match complete_callback(&state, query, jar).await {
        Ok((jar, target)) => {
            LOGIN_ATTEMPTS_TOTAL
                .with_label_values(&["federated", "success"])
                .inc();
            (jar, Redirect::to(&target)).into_response()
        }
        Err(error) => {
            LOGIN_ATTEMPTS_TOTAL
                .with_label_values(&["federated", "failure"])
                .inc();
            tracing::warn!(error = %format!("{error:#}"), "Federated login failed");
            Redirect::to(LOGIN_PATH).into_response()
        }
    }
}

async fn complete_callback(
    state: &AppState,
    query: CallbackQuery,
    jar: CookieJar,
) -> anyhow::Result<(CookieJar, String)> {
    if let Some(error) = query.error {
        bail!("provider returned error: {error}");
    }

    let federated = federated(state)?;
    let mut session = Session::load(&jar, state).await?;
    let pending = session
        .data
        .pending_login
        .take()
        .ok_or_else(|| anyhow!("no login in progress"))?;

    if query.state.as_deref() != Some(pending.state.as_str()) {
        bail!("state mismatch");
    }
    let code = query.code.context("missing authorization code")?;

    let principal = federated.complete_login(&pending, &code).await?;
    let user = state.users.upsert_user(principal.claims.to_upsert()).await?;

    session.regenerate(state).await?;
    session.data.passport = Some(principal);
    let jar = session.save_with_cookie(state, jar).await?;

    tracing::info!(user_id = %user.id, strategy = %pending.strategy, "Federated login succeeded");

    let target = pending.return_to.unwrap_or_else(|| "/".to_string());
    Ok((jar, target))
}

/// GET /logout
///
/// Ends the local session, then hands off to the provider's end-session
/// endpoint when one is known.
async fn federated_logout(
    State(state): State<AppState>,
    RequestHost(host): RequestHost,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let federated = federated(&state)?;
    let session = Session::load(&jar, &state).await?;
    let jar = session.destroy(&state, jar).await?;

    let target = federated
        .end_session_url(&host)
        .await
        .unwrap_or_else(|| "/".to_string());

    Ok((jar, Redirect::to(&target)))
}
