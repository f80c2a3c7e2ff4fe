//! Moderation reports.
//!
//! A report is immutable once created. Review happens outside this core;
//! the session engine only ever creates reports in [`ReportStatus::Pending`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::SubjectId;

/// Review state of a report. Only moderation tooling moves it past `Pending`.
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
pub enum ReportStatus {
  #[default]
  Pending,
  Resolved,
  Dismissed,
}

/// A user's complaint about another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
  pub report_id:           Uuid,
  pub reporter_id:         SubjectId,
  pub target_id:           SubjectId,
  /// The target's display name at the time of reporting; kept even if the
  /// target later renames.
  pub target_display_name: String,
  pub reason:              String,
  pub created_at:          DateTime<Utc>,
  pub status:              ReportStatus,
  pub tenant_id:           String,
}

impl Report {
  pub fn new(
    reporter_id: SubjectId,
    target_id: SubjectId,
    target_display_name: impl Into<String>,
    reason: impl Into<String>,
    tenant_id: impl Into<String>,
  ) -> Self {
    Self {
      report_id: Uuid::new_v4(),
      reporter_id,
      target_id,
      target_display_name: target_display_name.into(),
      reason: reason.into(),
      created_at: Utc::now(),
      status: ReportStatus::Pending,
      tenant_id: tenant_id.into(),
    }
  }
}
