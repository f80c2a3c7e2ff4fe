//! [`MutationGateway`] — the only path by which local code changes a profile.
//!
//! Writes are serialized by one async mutex, so read-modify-write operations
//! such as [`block`](MutationGateway::block) always see the result of the
//! previous write. A write is sent to the directory first; only once it is
//! accepted is the patch merged into the published profile. The next
//! snapshot from the directory replaces that merge unconditionally, and a
//! patch whose snapshot was adopted before the write returned is not merged
//! at all.

use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use kindred_core::{
  Error, Result,
  directory::DirectoryService,
  error::DirectoryError,
  identity::{Credentials, IdentityProvider},
  profile::{NewProfile, Profile, ProfilePatch, SubjectId},
  report::Report,
  session::SessionSnapshot,
};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::{manager::Command, reconcile::Input};

/// How long registration waits for the session to follow a new account.
const FOLLOW_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget last-active touch. Failures are logged and dropped.
pub(crate) fn spawn_touch<D>(directory: Arc<D>, subject_id: SubjectId)
where
  D: DirectoryService + 'static,
{
  tokio::spawn(async move {
    if let Err(e) = directory.touch_last_active(subject_id.clone()).await {
      debug!(%subject_id, error = %e, "last-active touch failed");
    }
  });
}

pub struct MutationGateway<I, D> {
  identity:       Arc<I>,
  directory:      Arc<D>,
  inbox:          mpsc::Sender<Command>,
  state:          watch::Receiver<SessionSnapshot>,
  default_tenant: String,
  write_lock:     Mutex<()>,
  write_seq:      AtomicU64,
}

impl<I, D> MutationGateway<I, D>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  pub(crate) fn new(
    identity: Arc<I>,
    directory: Arc<D>,
    inbox: mpsc::Sender<Command>,
    state: watch::Receiver<SessionSnapshot>,
    default_tenant: String,
  ) -> Self {
    Self {
      identity,
      directory,
      inbox,
      state,
      default_tenant,
      write_lock: Mutex::new(()),
      write_seq: AtomicU64::new(0),
    }
  }

  // ── Profile writes ────────────────────────────────────────────────────────

  /// Write `patch` to the signed-in user's profile.
  ///
  /// Fails with [`Error::NotAuthenticated`] when no profile is loaded. A
  /// refused write is not merged locally.
  pub async fn update_profile(&self, patch: ProfilePatch) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    self.write(patch).await
  }

  /// Add `target` to the block list. Blocking someone already blocked is a
  /// no-op.
  pub async fn block(&self, target: SubjectId) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    self.block_locked(target).await
  }

  /// Like `target` if not yet liked, otherwise unlike. Returns whether
  /// `target` is liked afterwards.
  pub async fn toggle_like(&self, target: SubjectId) -> Result<bool> {
    let _guard = self.write_lock.lock().await;
    let profile = self.current_profile()?;
    if target == profile.subject_id {
      return Err(Error::InvalidInput("cannot like yourself".into()));
    }

    let mut liked = profile.liked_ids;
    let now_liked = match liked.iter().position(|id| *id == target) {
      Some(at) => {
        liked.remove(at);
        false
      }
      None => {
        liked.push(target);
        true
      }
    };
    self.write(ProfilePatch::liked_ids(liked)).await?;
    Ok(now_liked)
  }

  /// File a report against `target` and block them.
  ///
  /// The block happens even when the report itself could not be stored; the
  /// returned result describes the report write.
  pub async fn report(
    &self,
    target: SubjectId,
    target_display_name: impl Into<String>,
    reason: impl Into<String>,
  ) -> Result<Report> {
    let reason = reason.into();
    if reason.trim().is_empty() {
      return Err(Error::InvalidInput("a reason is required".into()));
    }

    let _guard = self.write_lock.lock().await;
    let profile = self.current_profile()?;
    if target == profile.subject_id {
      return Err(Error::InvalidInput("cannot report yourself".into()));
    }
    let tenant_id = profile
      .tenant_id
      .filter(|t| !t.is_empty())
      .ok_or(Error::MissingTenant)?;

    let report = Report::new(
      profile.subject_id,
      target.clone(),
      target_display_name,
      reason,
      tenant_id,
    );
    let created = self.directory.create_report(report.clone()).await;
    let blocked = self.block_locked(target).await;

    if let Err(e) = created {
      return Err(self.directory_failure(e).await);
    }
    blocked?;
    info!(report_id = %report.report_id, target_id = %report.target_id, "report filed");
    Ok(report)
  }

  /// Mark the account deleted, then sign out whatever the write's outcome.
  /// Only the write's result is returned.
  pub async fn soft_delete_account(&self) -> Result<()> {
    let written = {
      let _guard = self.write_lock.lock().await;
      self.write(ProfilePatch::soft_delete()).await
    };
    match &written {
      Ok(()) => info!("account soft-deleted"),
      Err(e) => warn!(error = %e, "soft delete not confirmed; signing out anyway"),
    }
    if let Err(e) = self.identity.sign_out().await {
      warn!(error = %e, "sign-out after account deletion failed");
    }
    written
  }

  // ── Registration ──────────────────────────────────────────────────────────

  /// Create a provider account, then its profile.
  ///
  /// Role, status and tenant always take server defaults. If the profile
  /// write fails after the account exists, the session is left waiting for a
  /// profile that is not there yet, which it tolerates.
  pub async fn register(
    &self,
    email: impl Into<String>,
    password: impl Into<String>,
    profile: NewProfile,
  ) -> Result<Profile> {
    let credentials = Credentials::new(email, password);
    if let Err(e) = credentials.validate() {
      return Err(self.surface(e).await);
    }
    if profile.display_name.trim().is_empty() {
      return Err(self.surface(Error::InvalidInput("a display name is required".into())).await);
    }
    if profile.requests_privileged_fields() {
      warn!("registration tried to set role, status or tenant; using defaults");
    }

    let subject_id = match self.identity.create_account(credentials).await {
      Ok(id) => id,
      Err(e) => return Err(self.surface(Error::from(e)).await),
    };

    self.follow(&subject_id).await;

    let stored = profile.into_profile(subject_id.clone(), &self.default_tenant, Utc::now());
    if let Err(e) = self.directory.create_profile(stored.clone()).await {
      warn!(%subject_id, "account created but profile write failed");
      return Err(self.directory_failure(e).await);
    }
    info!(%subject_id, "registered");
    Ok(stored)
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  fn current_profile(&self) -> Result<Profile> {
    self
      .state
      .borrow()
      .profile()
      .cloned()
      .ok_or(Error::NotAuthenticated)
  }

  /// Wait until the published session belongs to `subject_id`, so that a
  /// sign-in transition cannot clear an error surfaced after it.
  async fn follow(&self, subject_id: &SubjectId) {
    let mut rx = self.state.clone();
    let followed = tokio::time::timeout(
      FOLLOW_TIMEOUT,
      rx.wait_for(|s| s.subject_id.as_ref() == Some(subject_id)),
    )
    .await
    .is_ok_and(|r| r.is_ok());
    if !followed {
      debug!(%subject_id, "session has not picked up the new account yet");
    }
  }

  /// Caller must hold `write_lock`.
  async fn block_locked(&self, target: SubjectId) -> Result<()> {
    let profile = self.current_profile()?;
    if target == profile.subject_id {
      return Err(Error::InvalidInput("cannot block yourself".into()));
    }
    if profile.has_blocked(&target) {
      debug!(%target, "already blocked");
      return Ok(());
    }
    let mut blocked = profile.blocked_ids;
    blocked.push(target);
    self.write(ProfilePatch::blocked_ids(blocked)).await
  }

  /// Caller must hold `write_lock`.
  async fn write(&self, patch: ProfilePatch) -> Result<()> {
    if patch.is_empty() {
      return Err(Error::InvalidInput("nothing to update".into()));
    }
    let subject_id = self.current_profile()?.subject_id;
    let epoch = self.stamp().await?;

    if let Err(e) = self
      .directory
      .write_profile(subject_id.clone(), patch.clone())
      .await
    {
      return Err(self.directory_failure(e).await);
    }

    let seq = self.write_seq.fetch_add(1, Ordering::Relaxed) + 1;
    let (applied, merged) = oneshot::channel();
    self
      .inbox
      .send(Command::Patch { subject_id: subject_id.clone(), seq, epoch, patch, applied })
      .await
      .map_err(|_| Error::SessionClosed)?;
    merged.await.map_err(|_| Error::SessionClosed)?;
    debug!(%subject_id, seq, "local write merged");

    spawn_touch(self.directory.clone(), subject_id);
    Ok(())
  }

  /// The actor's snapshot epoch, read in inbox order.
  async fn stamp(&self) -> Result<u64> {
    let (reply, epoch) = oneshot::channel();
    self
      .inbox
      .send(Command::Stamp(reply))
      .await
      .map_err(|_| Error::SessionClosed)?;
    epoch.await.map_err(|_| Error::SessionClosed)
  }

  async fn directory_failure(&self, e: DirectoryError) -> Error {
    let err = Error::from(e);
    if let Error::SecurityAnomaly(detail) = &err {
      error!(%detail, "directory refused a write that should have been allowed");
    } else {
      warn!(error = %err, "directory write failed");
      return err;
    }
    self.surface(err).await
  }

  /// Publish `err` alongside the session state and hand it back.
  pub(crate) async fn surface(&self, err: Error) -> Error {
    debug!(kind = ?err.kind(), "surfacing error");
    if self
      .inbox
      .send(Command::Input(Input::Surface(err.kind())))
      .await
      .is_err()
    {
      warn!(error = %err, "session closed; error not published");
    }
    err
  }
}
