//! [`SqliteIdentity`] — a local email/password identity provider.
//!
//! Accounts live in the `accounts` table next to the directory. Passwords are
//! stored as argon2 PHC strings and hashed off the async runtime. Repeated
//! wrong passwords lock an account for a while.
//!
//! The provider tracks one signed-in identity, the way a device-local auth
//! client does, and announces every change on a broadcast channel.

use std::sync::{Mutex, PoisonError};

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
  password_hash::SaltString,
};
use chrono::{DateTime, Duration, Utc};
use rand_core::OsRng;
use rusqlite::OptionalExtension as _;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_core::{
  error::{IdentityError, Rejection},
  identity::{Credentials, Identity, IdentityEvent, IdentityProvider},
  profile::SubjectId,
};

use crate::{
  encode::{decode_dt, encode_dt},
  error::is_constraint_violation,
};

const EVENT_CAPACITY: usize = 32;

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
  /// Consecutive wrong passwords before an account is locked.
  pub max_failed_attempts: u32,
  /// How long a locked account stays locked.
  pub lockout_secs:        u64,
  /// Shorter passwords are refused at account creation.
  pub min_password_len:    usize,
}

impl Default for IdentityConfig {
  fn default() -> Self {
    Self { max_failed_attempts: 5, lockout_secs: 300, min_password_len: 6 }
  }
}

// ─── Provider ────────────────────────────────────────────────────────────────

pub struct SqliteIdentity {
  conn:    tokio_rusqlite::Connection,
  config:  IdentityConfig,
  events:  broadcast::Sender<IdentityEvent>,
  current: Mutex<Option<Identity>>,
}

/// The columns sign-in needs from an `accounts` row.
struct AccountRow {
  subject_id:    String,
  password_hash: String,
  locked_until:  Option<String>,
}

fn unavailable(e: impl std::fmt::Display) -> IdentityError {
  IdentityError::Unavailable(e.to_string())
}

/// Trim and lowercase; anything without an `@` is not an email.
fn normalize_email(email: &str) -> Result<String, IdentityError> {
  let email = email.trim().to_lowercase();
  if !email.contains('@') {
    return Err(IdentityError::Rejected(Rejection::InvalidCredential));
  }
  Ok(email)
}

async fn hash_password(password: String) -> Result<String, IdentityError> {
  tokio::task::spawn_blocking(move || {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map(|hash| hash.to_string())
  })
  .await
  .map_err(unavailable)?
  .map_err(unavailable)
}

async fn verify_password(password: String, hash: String) -> Result<bool, IdentityError> {
  tokio::task::spawn_blocking(move || {
    let parsed = PasswordHash::new(&hash)?;
    Ok::<_, argon2::password_hash::Error>(
      Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok(),
    )
  })
  .await
  .map_err(unavailable)?
  .map_err(unavailable)
}

impl SqliteIdentity {
  pub(crate) fn new(conn: tokio_rusqlite::Connection, config: IdentityConfig) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self { conn, config, events, current: Mutex::new(None) }
  }

  /// Replace the signed-in identity, announcing the change if there was one.
  fn set_current(&self, next: Option<Identity>) {
    let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
    if *current == next {
      return;
    }
    *current = next.clone();
    drop(current);

    let event = match next {
      Some(identity) => IdentityEvent::SignedIn(identity),
      None => IdentityEvent::SignedOut,
    };
    // No receivers simply means nobody is watching.
    let _ = self.events.send(event);
  }

  async fn find_account(&self, email: String) -> Result<Option<AccountRow>, IdentityError> {
    self
      .conn
      .call(move |conn| {
        let row = conn
          .query_row(
            "SELECT subject_id, password_hash, locked_until
               FROM accounts WHERE email = ?1",
            rusqlite::params![email],
            |r| {
              Ok(AccountRow {
                subject_id:    r.get(0)?,
                password_hash: r.get(1)?,
                locked_until:  r.get(2)?,
              })
            },
          )
          .optional()?;
        Ok(row)
      })
      .await
      .map_err(unavailable)
  }

  /// Count a wrong password. Reaching the limit locks the account and
  /// restarts the count. Returns whether this attempt locked it.
  async fn record_failure(&self, subject_id: String) -> Result<bool, IdentityError> {
    let limit = i64::from(self.config.max_failed_attempts.max(1));
    let lockout_secs = u32::try_from(self.config.lockout_secs).unwrap_or(u32::MAX);
    let lockout = Duration::seconds(i64::from(lockout_secs));
    let until = encode_dt(Utc::now() + lockout);
    self
      .conn
      .call(move |conn| {
        let locked: bool = conn.query_row(
          "UPDATE accounts SET
             locked_until    = CASE WHEN failed_attempts + 1 >= ?2 THEN ?3
                                    ELSE locked_until END,
             failed_attempts = CASE WHEN failed_attempts + 1 >= ?2 THEN 0
                                    ELSE failed_attempts + 1 END
           WHERE subject_id = ?1
           RETURNING failed_attempts = 0",
          rusqlite::params![subject_id, limit, until],
          |r| r.get(0),
        )?;
        Ok(locked)
      })
      .await
      .map_err(unavailable)
  }

  async fn clear_failures(&self, subject_id: String) -> Result<(), IdentityError> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE accounts SET failed_attempts = 0, locked_until = NULL
           WHERE subject_id = ?1",
          rusqlite::params![subject_id],
        )?;
        Ok(())
      })
      .await
      .map_err(unavailable)
  }
}

fn is_locked(locked_until: Option<&str>, now: DateTime<Utc>) -> bool {
  locked_until
    .and_then(|s| decode_dt(s).ok())
    .is_some_and(|until| until > now)
}

// ─── IdentityProvider impl ───────────────────────────────────────────────────

impl IdentityProvider for SqliteIdentity {
  fn observe(&self) -> broadcast::Receiver<IdentityEvent> { self.events.subscribe() }

  fn current(&self) -> Option<Identity> {
    self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  async fn sign_in(&self, credentials: Credentials) -> Result<Identity, IdentityError> {
    let email = normalize_email(&credentials.email)?;
    let Some(account) = self.find_account(email).await? else {
      debug!("sign-in for unknown email");
      return Err(IdentityError::Rejected(Rejection::NotFound));
    };

    if is_locked(account.locked_until.as_deref(), Utc::now()) {
      warn!(subject_id = %account.subject_id, "sign-in refused; account locked");
      return Err(IdentityError::Rejected(Rejection::RateLimited));
    }

    if !verify_password(credentials.password, account.password_hash).await? {
      if self.record_failure(account.subject_id.clone()).await? {
        warn!(subject_id = %account.subject_id, "too many failed sign-ins; account locked");
      }
      return Err(IdentityError::Rejected(Rejection::WrongPassword));
    }

    self.clear_failures(account.subject_id.clone()).await?;
    let identity = Identity::new(account.subject_id);
    info!(subject_id = %identity.subject_id, "signed in");
    self.set_current(Some(identity.clone()));
    Ok(identity)
  }

  async fn create_account(&self, credentials: Credentials) -> Result<SubjectId, IdentityError> {
    let email = normalize_email(&credentials.email)?;
    if credentials.password.chars().count() < self.config.min_password_len {
      return Err(IdentityError::Rejected(Rejection::WeakPassword));
    }

    let hash = hash_password(credentials.password).await?;
    let subject_id = SubjectId::new(Uuid::new_v4().simple().to_string());
    let id = subject_id.as_str().to_owned();
    let created_at = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO accounts (subject_id, email, password_hash, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id, email, hash, created_at],
        )?;
        Ok(())
      })
      .await;
    match inserted {
      Ok(()) => {}
      Err(e) if is_constraint_violation(&e) => {
        return Err(IdentityError::Rejected(Rejection::EmailInUse));
      }
      Err(e) => return Err(unavailable(e)),
    }

    info!(%subject_id, "account created");
    self.set_current(Some(Identity::new(subject_id.clone())));
    Ok(subject_id)
  }

  async fn sign_out(&self) -> Result<(), IdentityError> {
    if let Some(identity) = self.current() {
      info!(subject_id = %identity.subject_id, "signed out");
    }
    self.set_current(None);
    Ok(())
  }

  async fn revoke(&self, subject_id: SubjectId) -> Result<(), IdentityError> {
    if self.current().is_some_and(|c| c.subject_id == subject_id) {
      info!(%subject_id, "revoking active session");
      self.set_current(None);
    } else {
      debug!(%subject_id, "revoke for a subject with no local session");
    }
    Ok(())
  }
}
