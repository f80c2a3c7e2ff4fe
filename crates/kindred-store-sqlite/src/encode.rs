//! Conversions between domain types and the plain-text column values stored
//! in SQLite.
//!
//! Timestamps are RFC 3339 strings. Enums use their SCREAMING_SNAKE_CASE
//! names. Lists and demographics are compact JSON.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use kindred_core::{
  profile::{AccountStatus, Demographics, Profile, ProfilePatch, Role, SubjectId},
  report::{Report, ReportStatus},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

/// Parse a strum-backed enum column.
pub fn decode_enum<T: FromStr>(column: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {column}: {s:?}")))
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

// ─── Profiles ────────────────────────────────────────────────────────────────

/// Column list matching [`RawProfile::from_row`].
pub const PROFILE_COLUMNS: &str = "subject_id, role, status, tenant_id, \
   display_name, demographics, photos, blocked_ids, liked_ids, joined_at, \
   last_active_at";

/// Raw strings read directly from a `profiles` row.
pub struct RawProfile {
  pub subject_id:     String,
  pub role:           String,
  pub status:         String,
  pub tenant_id:      Option<String>,
  pub display_name:   String,
  pub demographics:   String,
  pub photos:         String,
  pub blocked_ids:    String,
  pub liked_ids:      String,
  pub joined_at:      String,
  pub last_active_at: Option<String>,
}

impl RawProfile {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:     row.get(0)?,
      role:           row.get(1)?,
      status:         row.get(2)?,
      tenant_id:      row.get(3)?,
      display_name:   row.get(4)?,
      demographics:   row.get(5)?,
      photos:         row.get(6)?,
      blocked_ids:    row.get(7)?,
      liked_ids:      row.get(8)?,
      joined_at:      row.get(9)?,
      last_active_at: row.get(10)?,
    })
  }

  pub fn into_profile(self) -> Result<Profile> {
    let demographics: Demographics = serde_json::from_str(&self.demographics)?;
    Ok(Profile {
      subject_id: SubjectId::new(self.subject_id),
      role: decode_enum::<Role>("role", &self.role)?,
      status: decode_enum::<AccountStatus>("status", &self.status)?,
      tenant_id: self.tenant_id,
      display_name: self.display_name,
      demographics,
      photos: serde_json::from_str(&self.photos)?,
      blocked_ids: serde_json::from_str(&self.blocked_ids)?,
      liked_ids: serde_json::from_str(&self.liked_ids)?,
      joined_at: decode_dt(&self.joined_at)?,
      last_active_at: self.last_active_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Column values for an `UPDATE … SET col = COALESCE(?, col)` statement.
/// `None` leaves the column as it is.
pub struct EncodedPatch {
  pub display_name: Option<String>,
  pub demographics: Option<String>,
  pub photos:       Option<String>,
  pub blocked_ids:  Option<String>,
  pub liked_ids:    Option<String>,
  pub status:       Option<String>,
}

impl EncodedPatch {
  pub fn new(patch: &ProfilePatch) -> Result<Self> {
    Ok(Self {
      display_name: patch.display_name.clone(),
      demographics: patch.demographics.as_ref().map(encode_json).transpose()?,
      photos:       patch.photos.as_deref().map(encode_json).transpose()?,
      blocked_ids:  patch.blocked_ids.as_deref().map(encode_json).transpose()?,
      liked_ids:    patch.liked_ids.as_deref().map(encode_json).transpose()?,
      status:       patch.status.map(|s| s.to_string()),
    })
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

pub const REPORT_COLUMNS: &str = "report_id, reporter_id, target_id, \
   target_display_name, reason, created_at, status, tenant_id";

/// Raw strings read directly from a `reports` row.
pub struct RawReport {
  pub report_id:           String,
  pub reporter_id:         String,
  pub target_id:           String,
  pub target_display_name: String,
  pub reason:              String,
  pub created_at:          String,
  pub status:              String,
  pub tenant_id:           String,
}

impl RawReport {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      report_id:           row.get(0)?,
      reporter_id:         row.get(1)?,
      target_id:           row.get(2)?,
      target_display_name: row.get(3)?,
      reason:              row.get(4)?,
      created_at:          row.get(5)?,
      status:              row.get(6)?,
      tenant_id:           row.get(7)?,
    })
  }

  pub fn into_report(self) -> Result<Report> {
    Ok(Report {
      report_id: Uuid::parse_str(&self.report_id)?,
      reporter_id: SubjectId::new(self.reporter_id),
      target_id: SubjectId::new(self.target_id),
      target_display_name: self.target_display_name,
      reason: self.reason,
      created_at: decode_dt(&self.created_at)?,
      status: decode_enum::<ReportStatus>("report status", &self.status)?,
      tenant_id: self.tenant_id,
    })
  }
}
