//! Error type for `kindred-store-sqlite`.

use kindred_core::{error::DirectoryError, profile::SubjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored column did not hold a value we know how to read.
  #[error("decode error: {0}")]
  Decode(String),

  #[error("profile not found: {0}")]
  ProfileNotFound(SubjectId),

  /// The write was refused by the directory's access rules.
  #[error("permission denied: {0}")]
  PermissionDenied(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for DirectoryError {
  fn from(e: Error) -> Self {
    match e {
      Error::ProfileNotFound(id) => Self::NotFound(id),
      Error::PermissionDenied(m) => Self::PermissionDenied(m),
      other => Self::Unavailable(other.to_string()),
    }
  }
}

/// Whether `e` is SQLite refusing a row because of a constraint.
pub(crate) fn is_constraint_violation(e: &tokio_rusqlite::Error) -> bool {
  matches!(
    e,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _))
      if f.code == rusqlite::ErrorCode::ConstraintViolation
  )
}
