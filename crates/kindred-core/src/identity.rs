//! The identity-provider seam.
//!
//! The provider owns accounts and sign-in state. The session engine only
//! observes it, asks it to sign in/out, creates accounts during registration,
//! and revokes a subject when the directory reports a terminal status.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
  Error, Result,
  error::IdentityError,
  profile::SubjectId,
};

/// A signed-in subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub subject_id: SubjectId,
}

impl Identity {
  pub fn new(subject_id: impl Into<SubjectId>) -> Self {
    Self { subject_id: subject_id.into() }
  }
}

/// A change in the provider's sign-in state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
  SignedIn(Identity),
  SignedOut,
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// Email/password pair. `Debug` never prints the password.
#[derive(Clone, Deserialize)]
pub struct Credentials {
  pub email:    String,
  pub password: String,
}

impl Credentials {
  pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
    Self { email: email.into(), password: password.into() }
  }

  /// Shape checks done before anything reaches the provider.
  pub fn validate(&self) -> Result<()> {
    let email = self.email.trim();
    if email.is_empty() {
      return Err(Error::InvalidInput("email is required".into()));
    }
    if !email.contains('@') {
      return Err(Error::InvalidInput("email is malformed".into()));
    }
    if self.password.is_empty() {
      return Err(Error::InvalidInput("password is required".into()));
    }
    Ok(())
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("email", &self.email)
      .field("password", &"<redacted>")
      .finish()
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an external identity provider.
///
/// All async methods return `Send` futures so the engine can drive them from
/// spawned tokio tasks.
pub trait IdentityProvider: Send + Sync {
  /// Subscribe to sign-in state changes from this point on.
  fn observe(&self) -> broadcast::Receiver<IdentityEvent>;

  /// The identity signed in right now, if any.
  fn current(&self) -> Option<Identity>;

  /// Fails with `InvalidCredential`, `NotFound`, `WrongPassword` or
  /// `RateLimited`.
  fn sign_in(
    &self,
    credentials: Credentials,
  ) -> impl Future<Output = Result<Identity, IdentityError>> + Send + '_;

  /// Create an account and sign it in. Fails with `EmailInUse` or
  /// `WeakPassword`.
  fn create_account(
    &self,
    credentials: Credentials,
  ) -> impl Future<Output = Result<SubjectId, IdentityError>> + Send + '_;

  fn sign_out(
    &self,
  ) -> impl Future<Output = Result<(), IdentityError>> + Send + '_;

  /// End every session held by `subject_id`.
  fn revoke(
    &self,
    subject_id: SubjectId,
  ) -> impl Future<Output = Result<(), IdentityError>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_rejects_missing_fields() {
    assert!(matches!(
      Credentials::new("", "pw").validate(),
      Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
      Credentials::new("a@x.com", "").validate(),
      Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
      Credentials::new("not-an-email", "pw").validate(),
      Err(Error::InvalidInput(_))
    ));
    assert!(Credentials::new("a@x.com", "secret").validate().is_ok());
  }

  #[test]
  fn debug_redacts_password() {
    let shown = format!("{:?}", Credentials::new("a@x.com", "hunter2"));
    assert!(shown.contains("a@x.com"));
    assert!(!shown.contains("hunter2"));
  }
}
