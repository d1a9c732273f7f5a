//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations (users and sessions)
//! - User storage seam used by the login paths

mod database;
mod models;
mod store;

pub use database::Database;
pub use models::*;
#[cfg(test)]
pub use store::MockUserStore;
pub use store::UserStore;
