//! Authenticated identities
//!
//! A request is authenticated either by a password-login user stored in the
//! session or by an OIDC principal carrying provider tokens.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::data::{UpsertUser, User};

/// Claims taken from the provider's id token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// Provider-specific claims (iss, aud, iat, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Record written to user storage on every successful federated login.
    pub fn to_upsert(&self) -> UpsertUser {
        UpsertUser {
            id: self.sub.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_image_url: self.profile_image_url.clone(),
        }
    }
}

/// Identity established through the OIDC login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedPrincipal {
    pub claims: Claims,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; taken from the id token's `exp`
    pub expires_at: i64,
}

impl FederatedPrincipal {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    /// Public view returned to clients; tokens stay server-side.
    pub fn view(&self) -> PrincipalView<'_> {
        PrincipalView {
            claims: &self.claims,
            expires_at: self.expires_at,
        }
    }
}

/// Serializable principal without tokens.
#[derive(Debug, Serialize)]
pub struct PrincipalView<'a> {
    pub claims: &'a Claims,
    pub expires_at: i64,
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Demo(User),
    Federated(FederatedPrincipal),
}

impl Identity {
    /// Stable user id for logging.
    pub fn user_id(&self) -> &str {
        match self {
            Identity::Demo(user) => &user.id,
            Identity::Federated(principal) => &principal.claims.sub,
        }
    }

    /// JSON body served by the current-user endpoint.
    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            Identity::Demo(user) => serde_json::to_value(user),
            Identity::Federated(principal) => serde_json::to_value(principal.view()),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}
