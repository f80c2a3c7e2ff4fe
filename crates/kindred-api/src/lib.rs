//! JSON REST API for Kindred.
//!
//! Exposes an axum [`Router`] over one [`SessionManager`]. Every route acts
//! on the session that manager owns; the server binary in `main.rs` wires it
//! to the SQLite backend.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", kindred_api::router(state))
//! ```

pub mod error;
pub mod profile;
pub mod reports;
pub mod session;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{delete, get, patch, post},
};
use kindred_core::{directory::DirectoryService, identity::IdentityProvider};
use kindred_session::{SessionConfig, SessionManager};
use kindred_store_sqlite::IdentityConfig;
use serde::Deserialize;

pub use error::ApiError;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `KINDRED__*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub session:    SessionConfig,
  pub identity:   IdentityConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_string(),
      port:       8080,
      store_path: PathBuf::from("~/.local/share/kindred/kindred.db"),
      session:    SessionConfig::default(),
      identity:   IdentityConfig::default(),
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<I, D> {
  pub session: Arc<SessionManager<I, D>>,
}

impl<I, D> Clone for AppState<I, D> {
  fn clone(&self) -> Self { Self { session: self.session.clone() } }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
pub fn router<I, D>(state: AppState<I, D>) -> Router
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  Router::new()
    // Session
    .route("/session", get(session::show::<I, D>))
    .route("/session/sign-in", post(session::sign_in::<I, D>))
    .route("/session/sign-out", post(session::sign_out::<I, D>))
    .route("/session/register", post(session::register::<I, D>))
    .route("/session/error", delete(session::clear_error::<I, D>))
    // Own profile
    .route("/profile", patch(profile::update::<I, D>).delete(profile::soft_delete::<I, D>))
    .route("/profile/blocks", post(profile::block::<I, D>))
    .route("/profile/likes/{target}", post(profile::toggle_like::<I, D>))
    // Reports
    .route("/reports", post(reports::create::<I, D>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
