//! Authentication middleware
//!
//! Protects routes that require authentication.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use super::principal::Identity;
use super::session::Session;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::TOKEN_REFRESH_TOTAL;

/// Resolve the identity of a loaded session.
///
/// A password-login user is accepted as-is. A federated principal must be
/// fresh; a stale one is refreshed once through the provider and the session
/// is saved with the new tokens. Every other outcome is `Unauthorized`.
pub async fn authenticate(state: &AppState, session: &mut Session) -> Result<Identity, AppError> {
    if let Some(user) = &session.data.user {
        return Ok(Identity::Demo(user.clone()));
    }

    let federated = state.federated.as_ref().ok_or(AppError::Unauthorized)?;
    let principal = session
        .data
        .passport
        .as_mut()
        .ok_or(AppError::Unauthorized)?;

    if !principal.is_expired() {
        return Ok(Identity::Federated(principal.clone()));
    }

    if principal.refresh_token.is_none() {
        tracing::debug!(sub = %principal.claims.sub, "Principal expired without refresh token");
        return Err(AppError::Unauthorized);
    }

    if let Err(error) = federated.refresh(principal).await {
        TOKEN_REFRESH_TOTAL.with_label_values(&["failure"]).inc();
        tracing::info!(%error, sub = %principal.claims.sub, "Token refresh failed");
        return Err(AppError::Unauthorized);
    }
    TOKEN_REFRESH_TOTAL.with_label_values(&["success"]).inc();

    let identity = Identity::Federated(principal.clone());
    session.save(state).await?;
    tracing::debug!(user_id = %identity.user_id(), "Session tokens refreshed");

    Ok(identity)
}

/// Middleware to require authentication
///
/// Loads the session from the cookie and runs [`authenticate`].
/// Adds the resolved [`Identity`] to request extensions.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/api/...", ...)
///     .layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let mut session = Session::load(&jar, &state).await?;
    let identity = authenticate(&state, &mut session).await?;

    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Extractor for the current authenticated identity
///
/// Reuses the identity inserted by [`require_auth`] when present, otherwise
/// authenticates the request itself.
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(identity): CurrentUser) -> impl IntoResponse {
///     format!("Hello, {}", identity.user_id())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>().cloned() {
            return Ok(CurrentUser(identity));
        }

        let state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let mut session = Session::load(&jar, &state).await?;
        let identity = authenticate(&state, &mut session).await?;
        parts.extensions.insert(identity.clone());

        Ok(CurrentUser(identity))
    }
}
