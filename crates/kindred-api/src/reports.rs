//! Handler for `POST /reports`.
//!
//! Body: `{"target_id":..,"target_display_name":..,"reason":..}`. Files the
//! report and blocks the target; returns 201 with the stored report.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use kindred_core::{
  directory::DirectoryService, identity::IdentityProvider, profile::SubjectId,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ReportBody {
  pub target_id:           SubjectId,
  #[serde(default)]
  pub target_display_name: String,
  pub reason:              String,
}

/// `POST /reports`
pub async fn create<I, D>(
  State(state): State<AppState<I, D>>,
  Json(body): Json<ReportBody>,
) -> Result<impl IntoResponse, ApiError>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  let report = state
    .session
    .mutations()
    .report(body.target_id, body.target_display_name, body.reason)
    .await?;
  Ok((StatusCode::CREATED, Json(report)))
}
