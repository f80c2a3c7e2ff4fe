//! Handlers for `/session` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/session` | The published [`SessionSnapshot`] |
//! | `POST`   | `/session/sign-in` | Body: `{"email":..,"password":..}`; 204 |
//! | `POST`   | `/session/sign-out` | 204 |
//! | `POST`   | `/session/register` | Body: credentials plus profile fields; 201 + stored profile |
//! | `DELETE` | `/session/error` | Acknowledge the surfaced error; 204 |
//!
//! Sign-in only starts the session; its outcome is observed via
//! `GET /session`.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use kindred_core::{
  directory::DirectoryService,
  identity::{Credentials, IdentityProvider},
  profile::NewProfile,
  session::SessionSnapshot,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

/// `GET /session`
pub async fn show<I, D>(State(state): State<AppState<I, D>>) -> Json<SessionSnapshot>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  Json(state.session.snapshot())
}

/// `POST /session/sign-in`
pub async fn sign_in<I, D>(
  State(state): State<AppState<I, D>>,
  Json(body): Json<Credentials>,
) -> Result<StatusCode, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  state.session.sign_in(body.email, body.password).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /session/sign-out`
pub async fn sign_out<I, D>(
  State(state): State<AppState<I, D>>,
) -> Result<StatusCode, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  state.session.sign_out().await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
  pub email:    String,
  pub password: String,
  #[serde(flatten)]
  pub profile:  NewProfile,
}

/// `POST /session/register`
pub async fn register<I, D>(
  State(state): State<AppState<I, D>>,
  Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  let profile = state
    .session
    .mutations()
    .register(body.email, body.password, body.profile)
    .await?;
  Ok((StatusCode::CREATED, Json(profile)))
}

/// `DELETE /session/error`
pub async fn clear_error<I, D>(
  State(state): State<AppState<I, D>>,
) -> Result<StatusCode, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  state.session.clear_error().await?;
  Ok(StatusCode::NO_CONTENT)
}
