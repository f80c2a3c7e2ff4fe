//! [`SqliteStore`] — the SQLite implementation of [`DirectoryService`].
//!
//! Every accepted profile write is announced on an in-process broadcast
//! channel. Each live subscription re-reads its document when its subject is
//! announced, which gives subscribers the same "full snapshot on every
//! change" stream a hosted document database would.

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tokio::sync::{
  broadcast::{self, error::RecvError},
  mpsc,
};
use tracing::{debug, info, warn};

use kindred_core::{
  directory::{DirectoryService, ProfileEvent, ProfileFeed},
  error::DirectoryError,
  profile::{AccountStatus, Profile, ProfilePatch, Role, SubjectId},
  report::{Report, ReportStatus},
};

use crate::{
  Error, Result,
  encode::{
    EncodedPatch, PROFILE_COLUMNS, REPORT_COLUMNS, RawProfile, RawReport,
    encode_dt, encode_json, encode_uuid,
  },
  error::is_constraint_violation,
  identity::{IdentityConfig, SqliteIdentity},
  schema::SCHEMA,
};

/// Capacity of the in-process change feed shared by all subscriptions.
const CHANGE_CAPACITY: usize = 256;
/// Capacity of each subscriber's own feed.
const FEED_CAPACITY: usize = 16;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Kindred directory backed by a single SQLite file.
///
/// Cloning is cheap: the connection and the change feed are shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  changes: broadcast::Sender<SubjectId>,
}

/// What a guarded profile update found.
enum WriteOutcome {
  Written,
  Missing,
  Locked(String),
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
    Ok(Self { conn, changes })
  }

  /// An identity provider whose accounts live in this database.
  pub fn identity(&self, config: IdentityConfig) -> SqliteIdentity {
    SqliteIdentity::new(self.conn.clone(), config)
  }

  fn notify(&self, subject_id: SubjectId) {
    // No receivers simply means nobody is subscribed.
    let _ = self.changes.send(subject_id);
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_profile(&self, subject_id: SubjectId) -> Result<Option<Profile>> {
    let id = subject_id.as_str().to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE subject_id = ?1"),
            rusqlite::params![id],
            RawProfile::from_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;
    raw.map(RawProfile::into_profile).transpose()
  }

  /// Reports filed by `reporter_id`, oldest first.
  pub async fn reports_by(&self, reporter_id: SubjectId) -> Result<Vec<Report>> {
    let id = reporter_id.as_str().to_owned();
    let raws: Vec<RawReport> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REPORT_COLUMNS} FROM reports WHERE reporter_id = ?1 \
           ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id], RawReport::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawReport::into_report).collect()
  }

  // ── Moderation ────────────────────────────────────────────────────────────

  /// Change an account's standing. This is the moderation path; clients can
  /// only ever reach [`AccountStatus::Deleted`] through a profile write.
  pub async fn set_status(&self, subject_id: SubjectId, status: AccountStatus) -> Result<()> {
    let id = subject_id.as_str().to_owned();
    let status_str = status.to_string();
    let updated = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE profiles SET status = ?2 WHERE subject_id = ?1",
          rusqlite::params![id, status_str],
        )?;
        Ok(n)
      })
      .await?;
    if updated == 0 {
      return Err(Error::ProfileNotFound(subject_id));
    }
    info!(%subject_id, %status, "account status changed");
    self.notify(subject_id);
    Ok(())
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn update_profile(&self, subject_id: SubjectId, patch: ProfilePatch) -> Result<()> {
    if patch.status.is_some_and(|s| s != AccountStatus::Deleted) {
      return Err(Error::PermissionDenied(
        "status can only be changed to DELETED".into(),
      ));
    }
    let lists_self = |ids: &Option<Vec<SubjectId>>| {
      ids.as_ref().is_some_and(|ids| ids.contains(&subject_id))
    };
    if lists_self(&patch.blocked_ids) || lists_self(&patch.liked_ids) {
      return Err(Error::PermissionDenied(
        "a profile cannot block or like itself".into(),
      ));
    }

    let encoded = EncodedPatch::new(&patch)?;
    let id = subject_id.as_str().to_owned();
    let active = AccountStatus::Active.to_string();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let status: Option<String> = tx
          .query_row(
            "SELECT status FROM profiles WHERE subject_id = ?1",
            rusqlite::params![id],
            |r| r.get(0),
          )
          .optional()?;
        let outcome = match status {
          None => WriteOutcome::Missing,
          Some(status) if status != active => WriteOutcome::Locked(status),
          Some(_) => {
            tx.execute(
              "UPDATE profiles SET
                 display_name = COALESCE(?2, display_name),
                 demographics = COALESCE(?3, demographics),
                 photos       = COALESCE(?4, photos),
                 blocked_ids  = COALESCE(?5, blocked_ids),
                 liked_ids    = COALESCE(?6, liked_ids),
                 status       = COALESCE(?7, status)
               WHERE subject_id = ?1",
              rusqlite::params![
                id,
                encoded.display_name,
                encoded.demographics,
                encoded.photos,
                encoded.blocked_ids,
                encoded.liked_ids,
                encoded.status,
              ],
            )?;
            WriteOutcome::Written
          }
        };
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    match outcome {
      WriteOutcome::Written => {
        debug!(%subject_id, "profile updated");
        self.notify(subject_id);
        Ok(())
      }
      WriteOutcome::Missing => Err(Error::ProfileNotFound(subject_id)),
      WriteOutcome::Locked(status) => Err(Error::PermissionDenied(format!(
        "profile is {status} and cannot be changed"
      ))),
    }
  }

  async fn insert_profile(&self, profile: Profile) -> Result<()> {
    if profile.role != Role::User || profile.status != AccountStatus::Active {
      return Err(Error::PermissionDenied(
        "new profiles must be active users".into(),
      ));
    }

    let subject_id = profile.subject_id.clone();
    let id = subject_id.as_str().to_owned();
    let role = profile.role.to_string();
    let status = profile.status.to_string();
    let tenant_id = profile.tenant_id.clone();
    let display_name = profile.display_name.clone();
    let demographics = encode_json(&profile.demographics)?;
    let photos = encode_json(&profile.photos)?;
    let blocked_ids = encode_json(&profile.blocked_ids)?;
    let liked_ids = encode_json(&profile.liked_ids)?;
    let joined_at = encode_dt(profile.joined_at);
    let last_active_at = profile.last_active_at.map(encode_dt);

    let inserted = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO profiles (
             subject_id, role, status, tenant_id, display_name, demographics,
             photos, blocked_ids, liked_ids, joined_at, last_active_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            id,
            role,
            status,
            tenant_id,
            display_name,
            demographics,
            photos,
            blocked_ids,
            liked_ids,
            joined_at,
            last_active_at,
          ],
        )?;
        Ok(())
      })
      .await;

    match inserted {
      Ok(()) => {
        info!(%subject_id, "profile created");
        self.notify(subject_id);
        Ok(())
      }
      Err(e) if is_constraint_violation(&e) => Err(Error::PermissionDenied(
        format!("profile {subject_id} already exists"),
      )),
      Err(e) => Err(e.into()),
    }
  }

  async fn insert_report(&self, report: Report) -> Result<()> {
    if report.status != ReportStatus::Pending {
      return Err(Error::PermissionDenied("new reports must be pending".into()));
    }
    if report.reporter_id == report.target_id {
      return Err(Error::PermissionDenied("cannot report yourself".into()));
    }

    let report_id = encode_uuid(report.report_id);
    let reporter_id = report.reporter_id.as_str().to_owned();
    let target_id = report.target_id.as_str().to_owned();
    let created_at = encode_dt(report.created_at);
    let status = report.status.to_string();
    let Report { target_display_name, reason, tenant_id, .. } = report;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO reports (
             report_id, reporter_id, target_id, target_display_name, reason,
             created_at, status, tenant_id
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            report_id,
            reporter_id,
            target_id,
            target_display_name,
            reason,
            created_at,
            status,
            tenant_id,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Stamp `last_active_at`. Not announced to subscribers.
  async fn stamp_last_active(&self, subject_id: SubjectId) -> Result<()> {
    let id = subject_id.as_str().to_owned();
    let now = encode_dt(Utc::now());
    let updated = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE profiles SET last_active_at = ?2 WHERE subject_id = ?1",
          rusqlite::params![id, now],
        )?;
        Ok(n)
      })
      .await?;
    if updated == 0 {
      return Err(Error::ProfileNotFound(subject_id));
    }
    Ok(())
  }

  // ── Subscriptions ─────────────────────────────────────────────────────────

  /// Re-read `subject_id` whenever it is announced, until the subscriber
  /// drops its feed.
  async fn pump(
    self,
    subject_id: SubjectId,
    mut changes: broadcast::Receiver<SubjectId>,
    tx: mpsc::Sender<ProfileEvent>,
  ) {
    loop {
      let changed = tokio::select! {
        _ = tx.closed() => break,
        changed = changes.recv() => changed,
      };
      match changed {
        Ok(id) if id != subject_id => continue,
        Ok(_) => {}
        Err(RecvError::Lagged(skipped)) => {
          debug!(%subject_id, skipped, "change feed lagged; re-reading");
        }
        Err(RecvError::Closed) => break,
      }

      let event = match self.get_profile(subject_id.clone()).await {
        Ok(profile) => ProfileEvent::Snapshot(profile),
        Err(e) => {
          warn!(%subject_id, error = %e, "profile re-read failed");
          ProfileEvent::TransientError(e.to_string())
        }
      };
      if tx.send(event).await.is_err() {
        break;
      }
    }
    debug!(%subject_id, "profile subscription closed");
  }
}

// ─── DirectoryService impl ───────────────────────────────────────────────────

impl DirectoryService for SqliteStore {
  async fn subscribe_profile(&self, subject_id: SubjectId) -> Result<ProfileFeed, DirectoryError> {
    // Subscribe before the first read so no write can slip in between.
    let changes = self.changes.subscribe();
    let initial = self.get_profile(subject_id.clone()).await?;

    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    if tx.try_send(ProfileEvent::Snapshot(initial)).is_err() {
      return Err(DirectoryError::Unavailable("subscription closed".into()));
    }
    tokio::spawn(self.clone().pump(subject_id, changes, tx));
    Ok(rx)
  }

  async fn write_profile(
    &self,
    subject_id: SubjectId,
    patch: ProfilePatch,
  ) -> Result<(), DirectoryError> {
    Ok(self.update_profile(subject_id, patch).await?)
  }

  async fn create_profile(&self, profile: Profile) -> Result<(), DirectoryError> {
    Ok(self.insert_profile(profile).await?)
  }

  async fn create_report(&self, report: Report) -> Result<(), DirectoryError> {
    Ok(self.insert_report(report).await?)
  }

  async fn touch_last_active(&self, subject_id: SubjectId) -> Result<(), DirectoryError> {
    Ok(self.stamp_last_active(subject_id).await?)
  }
}
