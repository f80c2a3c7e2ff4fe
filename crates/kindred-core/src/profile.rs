//! Profile — the directory-owned business record bound to an identity.
//!
//! The directory service owns the authoritative copy. The session engine
//! mirrors it locally and may merge a [`ProfilePatch`] ahead of confirmation,
//! but the next snapshot from the directory always replaces the local copy.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ─── Subject ids ─────────────────────────────────────────────────────────────

/// The opaque, stable id an identity provider assigns to an account.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SubjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for SubjectId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for SubjectId {
  fn from(s: String) -> Self { Self(s) }
}

// ─── Role & status ───────────────────────────────────────────────────────────

/// Privilege level. Never assignable by a client; see
/// [`NewProfile::into_profile`].
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
  #[default]
  User,
  Admin,
  SuperAdmin,
}

/// Account standing as recorded by the directory.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
  #[default]
  Active,
  Suspended,
  Banned,
  /// Soft-deleted. The record is kept; the session is not.
  Deleted,
}

impl AccountStatus {
  /// Terminal statuses end any live session and block new ones.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Suspended | Self::Banned | Self::Deleted)
  }
}

// ─── Profile ─────────────────────────────────────────────────────────────────

/// Self-described demographic fields. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Demographics {
  pub birth_date: Option<NaiveDate>,
  pub gender:     Option<String>,
  pub bio:        Option<String>,
  pub location:   Option<String>,
}

/// The directory's record for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub subject_id:     SubjectId,
  pub role:           Role,
  pub status:         AccountStatus,
  /// Older records may predate tenancy; reporting requires one.
  pub tenant_id:      Option<String>,
  pub display_name:   String,
  #[serde(flatten)]
  pub demographics:   Demographics,
  /// Photo URLs, in display order.
  pub photos:         Vec<String>,
  /// Insertion-ordered, duplicate-free.
  pub blocked_ids:    Vec<SubjectId>,
  /// Insertion-ordered, duplicate-free.
  pub liked_ids:      Vec<SubjectId>,
  pub joined_at:      DateTime<Utc>,
  pub last_active_at: Option<DateTime<Utc>>,
}

impl Profile {
  pub fn has_blocked(&self, id: &SubjectId) -> bool {
    self.blocked_ids.contains(id)
  }

  pub fn has_liked(&self, id: &SubjectId) -> bool {
    self.liked_ids.contains(id)
  }

  /// Merge `patch` into this profile in place. Absent fields are untouched.
  pub fn apply(&mut self, patch: &ProfilePatch) {
    if let Some(name) = &patch.display_name {
      self.display_name = name.clone();
    }
    if let Some(demographics) = &patch.demographics {
      self.demographics = demographics.clone();
    }
    if let Some(photos) = &patch.photos {
      self.photos = photos.clone();
    }
    if let Some(blocked) = &patch.blocked_ids {
      self.blocked_ids = blocked.clone();
    }
    if let Some(liked) = &patch.liked_ids {
      self.liked_ids = liked.clone();
    }
    if let Some(status) = patch.status {
      self.status = status;
    }
  }
}

// ─── ProfilePatch ────────────────────────────────────────────────────────────

/// A partial update to a [`Profile`].
///
/// `role`, `tenant_id`, `subject_id` and `joined_at` are not patchable.
/// `status` is never read from the wire; the only client-side status change
/// is [`ProfilePatch::soft_delete`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub demographics: Option<Demographics>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub photos:       Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub blocked_ids:  Option<Vec<SubjectId>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub liked_ids:    Option<Vec<SubjectId>>,
  #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
  pub status:       Option<AccountStatus>,
}

impl ProfilePatch {
  pub fn blocked_ids(ids: Vec<SubjectId>) -> Self {
    Self { blocked_ids: Some(ids), ..Self::default() }
  }

  pub fn liked_ids(ids: Vec<SubjectId>) -> Self {
    Self { liked_ids: Some(ids), ..Self::default() }
  }

  /// Mark the account as deleted without removing the record.
  pub fn soft_delete() -> Self {
    Self { status: Some(AccountStatus::Deleted), ..Self::default() }
  }

  pub fn is_empty(&self) -> bool { *self == Self::default() }
}

// ─── NewProfile ──────────────────────────────────────────────────────────────

/// Registration input.
///
/// `role`, `status` and `tenant_id` are accepted so that callers can send a
/// full profile document, but they are discarded: the stored profile always
/// starts as an active [`Role::User`] in the default tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewProfile {
  pub display_name: String,
  #[serde(flatten)]
  pub demographics: Demographics,
  pub photos:       Vec<String>,
  pub role:         Option<Role>,
  pub status:       Option<AccountStatus>,
  pub tenant_id:    Option<String>,
}

impl NewProfile {
  pub fn new(display_name: impl Into<String>) -> Self {
    Self { display_name: display_name.into(), ..Self::default() }
  }

  /// Whether the caller tried to choose any server-owned field.
  pub fn requests_privileged_fields(&self) -> bool {
    self.role.is_some_and(|r| r != Role::User)
      || self.status.is_some_and(|s| s != AccountStatus::Active)
      || self.tenant_id.is_some()
  }

  /// Build the stored profile, forcing server-owned fields to their defaults.
  pub fn into_profile(
    self,
    subject_id: SubjectId,
    default_tenant: &str,
    now: DateTime<Utc>,
  ) -> Profile {
    Profile {
      subject_id,
      role: Role::User,
      status: AccountStatus::Active,
      tenant_id: Some(default_tenant.to_owned()),
      display_name: self.display_name,
      demographics: self.demographics,
      photos: self.photos,
      blocked_ids: Vec::new(),
      liked_ids: Vec::new(),
      joined_at: now,
      last_active_at: Some(now),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn profile() -> Profile {
    NewProfile::new("Ada").into_profile("u1".into(), "default", Utc::now())
  }

  #[test]
  fn terminal_statuses() {
    assert!(!AccountStatus::Active.is_terminal());
    assert!(AccountStatus::Suspended.is_terminal());
    assert!(AccountStatus::Banned.is_terminal());
    assert!(AccountStatus::Deleted.is_terminal());
  }

  #[test]
  fn into_profile_ignores_caller_role_and_tenant() {
    let input = NewProfile {
      role: Some(Role::SuperAdmin),
      status: Some(AccountStatus::Banned),
      tenant_id: Some("other".into()),
      ..NewProfile::new("Mallory")
    };
    assert!(input.requests_privileged_fields());

    let stored = input.into_profile("u9".into(), "default", Utc::now());
    assert_eq!(stored.role, Role::User);
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(stored.tenant_id.as_deref(), Some("default"));
  }

  #[test]
  fn apply_only_touches_present_fields() {
    let mut p = profile();
    p.apply(&ProfilePatch::blocked_ids(vec!["u2".into()]));
    assert_eq!(p.blocked_ids, vec![SubjectId::from("u2")]);
    assert_eq!(p.display_name, "Ada");
    assert_eq!(p.status, AccountStatus::Active);

    p.apply(&ProfilePatch::soft_delete());
    assert_eq!(p.status, AccountStatus::Deleted);
    assert_eq!(p.blocked_ids.len(), 1);
  }

  #[test]
  fn patch_status_is_not_read_from_json() {
    let patch: ProfilePatch =
      serde_json::from_str(r#"{"display_name":"Eve","status":"ACTIVE"}"#)
        .unwrap();
    assert_eq!(patch.display_name.as_deref(), Some("Eve"));
    assert_eq!(patch.status, None);
  }

  #[test]
  fn role_string_forms_agree() {
    assert_eq!(Role::SuperAdmin.to_string(), "SUPER_ADMIN");
    assert_eq!("SUPER_ADMIN".parse::<Role>().unwrap(), Role::SuperAdmin);
    assert_eq!(
      serde_json::to_string(&AccountStatus::Banned).unwrap(),
      "\"BANNED\""
    );
  }
}
