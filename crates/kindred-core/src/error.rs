//! Error types for `kindred-core`.
//!
//! [`IdentityError`] and [`DirectoryError`] are what the two collaborators
//! return. [`Error`] is what the session engine returns to its callers, and
//! [`ErrorKind`] is the cheap, comparable form that gets published alongside
//! the session state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{AccountStatus, SubjectId};

// ─── Collaborator errors ─────────────────────────────────────────────────────

/// Why the identity provider refused a credential operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
  InvalidCredential,
  NotFound,
  WrongPassword,
  RateLimited,
  EmailInUse,
  WeakPassword,
}

impl Rejection {
  /// Stable, user-facing message. Deliberately does not distinguish an
  /// unknown account from a wrong password.
  pub fn message(self) -> &'static str {
    match self {
      Self::InvalidCredential | Self::NotFound | Self::WrongPassword => {
        "incorrect email or password"
      }
      Self::RateLimited => "too many attempts, try again later",
      Self::EmailInUse => "an account with this email already exists",
      Self::WeakPassword => "password is too weak",
    }
  }
}

#[derive(Debug, Error)]
pub enum IdentityError {
  #[error("rejected by identity provider: {0:?}")]
  Rejected(Rejection),

  #[error("identity provider unavailable: {0}")]
  Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
  #[error("permission denied: {0}")]
  PermissionDenied(String),

  #[error("directory unavailable: {0}")]
  Unavailable(String),

  #[error("profile not found: {0}")]
  NotFound(SubjectId),
}

// ─── Engine error ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  /// Rejected locally before any network call.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("{}", .0.message())]
  ProviderRejected(Rejection),

  #[error("connectivity problem: {0}")]
  TransientConnectivity(String),

  #[error("account is {0}")]
  PolicyViolation(AccountStatus),

  /// A write that should have been allowed was refused.
  #[error("a security error occurred")]
  SecurityAnomaly(String),

  #[error("not signed in")]
  NotAuthenticated,

  #[error("profile has no tenant")]
  MissingTenant,

  #[error("session manager has shut down")]
  SessionClosed,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InvalidInput(_) => ErrorKind::InvalidInput,
      Self::ProviderRejected(r) => ErrorKind::from(*r),
      Self::TransientConnectivity(_) => ErrorKind::Connectivity,
      Self::PolicyViolation(status) => ErrorKind::PolicyViolation(*status),
      Self::SecurityAnomaly(_) => ErrorKind::SecurityAnomaly,
      Self::NotAuthenticated => ErrorKind::NotAuthenticated,
      Self::MissingTenant => ErrorKind::MissingTenant,
      Self::SessionClosed => ErrorKind::SessionClosed,
    }
  }
}

impl From<IdentityError> for Error {
  fn from(e: IdentityError) -> Self {
    match e {
      IdentityError::Rejected(r) => Self::ProviderRejected(r),
      IdentityError::Unavailable(m) => Self::TransientConnectivity(m),
    }
  }
}

impl From<DirectoryError> for Error {
  fn from(e: DirectoryError) -> Self {
    match e {
      DirectoryError::PermissionDenied(m) => Self::SecurityAnomaly(m),
      DirectoryError::Unavailable(m) => Self::TransientConnectivity(m),
      // The profile document may still be in flight after registration.
      DirectoryError::NotFound(id) => {
        Self::TransientConnectivity(format!("profile {id} is not available yet"))
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Published kind ──────────────────────────────────────────────────────────

/// The stable category of an error, as surfaced in a
/// [`SessionSnapshot`](crate::session::SessionSnapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ErrorKind {
  InvalidInput,
  WrongCredentials,
  RateLimited,
  EmailInUse,
  WeakPassword,
  Connectivity,
  PolicyViolation(AccountStatus),
  SecurityAnomaly,
  NotAuthenticated,
  MissingTenant,
  SessionClosed,
}

impl From<Rejection> for ErrorKind {
  fn from(r: Rejection) -> Self {
    match r {
      Rejection::InvalidCredential
      | Rejection::NotFound
      | Rejection::WrongPassword => Self::WrongCredentials,
      Rejection::RateLimited => Self::RateLimited,
      Rejection::EmailInUse => Self::EmailInUse,
      Rejection::WeakPassword => Self::WeakPassword,
    }
  }
}
