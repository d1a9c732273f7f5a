//! Session management
//!
//! The browser holds only a signed session id cookie; the payload lives in a
//! [`SessionStore`](super::store::SessionStore).
//!
//! Cookie format: `{session_id}.{base64(hmac_sha256(session_id))}`

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::principal::FederatedPrincipal;
use crate::AppState;
use crate::config::AuthConfig;
use crate::data::User;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Payload stored per session.
///
/// `user` holds the password-login user, `passport` the OIDC principal.
/// Both may be present; the password-login user takes precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passport: Option<FederatedPrincipal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_login: Option<PendingLogin>,
}

/// Authorization request in flight between `/login` and `/callback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// Strategy name the login started with
    pub strategy: String,
    pub state: String,
    pub code_verifier: String,
    /// Relative path to land on after the callback
    pub return_to: Option<String>,
}

/// Generate a random 256-bit session id (base64url).
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Sign a session id for the cookie.
pub fn sign_session_id(session_id: &str, secret: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid session secret: {e}")))?;
    mac.update(session_id.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", session_id, signature))
}

/// Verify a signed cookie value and return the session id.
///
/// Any malformed or tampered value yields `None`.
pub fn verify_session_cookie(value: &str, secret: &str) -> Option<String> {
    let (session_id, signature_b64) = value.rsplit_once('.')?;
    if session_id.is_empty() {
        return None;
    }

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(session_id.as_bytes());
    mac.verify_slice(&signature).ok()?;

    Some(session_id.to_string())
}

/// A request's session: its id (if one was issued) and payload.
#[derive(Debug, Default)]
pub struct Session {
    id: Option<String>,
    pub data: SessionData,
}

impl Session {
    /// Load the session named by the request cookie.
    ///
    /// Missing, unsigned or expired sessions load as empty.
    pub async fn load(jar: &CookieJar, state: &AppState) -> Result<Self, AppError> {
        let auth = &state.config.auth;
        let Some(session_id) = jar
            .get(&auth.cookie_name)
            .and_then(|cookie| verify_session_cookie(cookie.value(), &auth.session_secret))
        else {
            return Ok(Self::default());
        };

        match state.sessions.load(&session_id).await? {
            Some(data) => Ok(Self {
                id: Some(session_id),
                data,
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Write the payload, issuing a new id if the session has none.
    pub async fn save(&mut self, state: &AppState) -> Result<(), AppError> {
        let session_id = self.id.get_or_insert_with(generate_session_id);
        let expires_at = Utc::now() + chrono::Duration::seconds(state.config.auth.session_ttl_seconds);
        state
            .sessions
            .save(session_id, &self.data, expires_at)
            .await?;
        Ok(())
    }

    /// Save and attach the session cookie to `jar`.
    pub async fn save_with_cookie(
        &mut self,
        state: &AppState,
        jar: CookieJar,
    ) -> Result<CookieJar, AppError> {
        self.save(state).await?;
        let session_id = self.id.as_deref().unwrap_or_default();
        let cookie = session_cookie(&state.config.auth, session_id)?;
        Ok(jar.add(cookie))
    }

    /// Drop the current id so the next save issues a fresh one.
    ///
    /// Called on every login so a pre-login id cannot be fixed by an attacker.
    pub async fn regenerate(&mut self, state: &AppState) -> Result<(), AppError> {
        if let Some(old_id) = self.id.take() {
            state.sessions.destroy(&old_id).await?;
        }
        Ok(())
    }

    /// Destroy the stored session and clear the cookie.
    pub async fn destroy(self, state: &AppState, jar: CookieJar) -> Result<CookieJar, AppError> {
        if let Some(session_id) = &self.id {
            state.sessions.destroy(session_id).await?;
        }
        Ok(jar.remove(clear_session_cookie(&state.config.auth)))
    }
}

fn session_cookie(auth: &AuthConfig, session_id: &str) -> Result<Cookie<'static>, AppError> {
    let value = sign_session_id(session_id, &auth.session_secret)?;
    Ok(Cookie::build((auth.cookie_name.clone(), value))
        .http_only(true)
        .secure(auth.secure_cookies)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(auth.session_ttl_seconds))
        .build())
}

fn clear_session_cookie(auth: &AuthConfig) -> Cookie<'static> {
    Cookie::build((auth.cookie_name.clone(), "")).path("/").build()
}
