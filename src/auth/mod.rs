//! Session-based authentication
//!
//! Handles:
//! - Password ("demo") login
//! - Federated OpenID Connect login with per-domain strategies
//! - Session management and token refresh
//! - Authentication middleware

pub mod discovery;
pub mod federated;
mod middleware;
pub mod oidc;
pub mod pkce;
pub mod principal;
pub mod session;
pub mod store;
pub mod strategy;

pub use federated::{FederatedAuth, LoginRedirect};
pub use middleware::{CurrentUser, authenticate, require_auth};
pub use principal::{Claims, FederatedPrincipal, Identity};
pub use session::{PendingLogin, Session, SessionData};
pub use store::{MemorySessionStore, SessionStore, StoreError, spawn_prune_task};
