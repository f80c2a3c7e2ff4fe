//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use kindred_core::{Error, ErrorKind};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Session(#[from] Error),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    let Self::Session(e) = self;
    match e.kind() {
      ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
      ErrorKind::WrongCredentials | ErrorKind::NotAuthenticated => {
        StatusCode::UNAUTHORIZED
      }
      ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
      ErrorKind::EmailInUse => StatusCode::CONFLICT,
      ErrorKind::WeakPassword | ErrorKind::MissingTenant => {
        StatusCode::UNPROCESSABLE_ENTITY
      }
      ErrorKind::PolicyViolation(_) | ErrorKind::SecurityAnomaly => {
        StatusCode::FORBIDDEN
      }
      ErrorKind::Connectivity | ErrorKind::SessionClosed => {
        StatusCode::SERVICE_UNAVAILABLE
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let Self::Session(e) = &self;
    let body = json!({ "error": e.to_string(), "kind": e.kind() });
    (self.status(), Json(body)).into_response()
  }
}
