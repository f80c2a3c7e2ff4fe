//! Handlers for the signed-in user's own `/profile`.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `PATCH`  | `/profile` | Body: [`ProfilePatch`]; returns the merged profile |
//! | `DELETE` | `/profile` | Soft-delete the account and sign out; 204 |
//! | `POST`   | `/profile/blocks` | Body: `{"target_id":..}`; idempotent; 204 |
//! | `POST`   | `/profile/likes/{target}` | Toggle; returns `{"liked":bool}` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use kindred_core::{
  Error,
  directory::DirectoryService,
  identity::IdentityProvider,
  profile::{Profile, ProfilePatch, SubjectId},
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

/// `PATCH /profile`
pub async fn update<I, D>(
  State(state): State<AppState<I, D>>,
  Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  state.session.mutations().update_profile(patch).await?;
  let profile = state
    .session
    .snapshot()
    .profile()
    .cloned()
    .ok_or(Error::NotAuthenticated)?;
  Ok(Json(profile))
}

/// `DELETE /profile`
pub async fn soft_delete<I, D>(
  State(state): State<AppState<I, D>>,
) -> Result<StatusCode, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  state.session.mutations().soft_delete_account().await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BlockBody {
  pub target_id: SubjectId,
}

/// `POST /profile/blocks`
pub async fn block<I, D>(
  State(state): State<AppState<I, D>>,
  Json(body): Json<BlockBody>,
) -> Result<StatusCode, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  state.session.mutations().block(body.target_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeResponse {
  pub liked: bool,
}

/// `POST /profile/likes/{target}`
pub async fn toggle_like<I, D>(
  State(state): State<AppState<I, D>>,
  Path(target): Path<String>,
) -> Result<Json<LikeResponse>, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  let liked = state.session.mutations().toggle_like(target.into()).await?;
  Ok(Json(LikeResponse { liked }))
}
