//! The published session value.

use serde::{Deserialize, Serialize};

use crate::{
  error::ErrorKind,
  profile::{AccountStatus, Profile, SubjectId},
};

/// What callers may assume about the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum SessionState {
  #[default]
  Unauthenticated,
  /// Signed in at the provider; profile not yet seen.
  Loading,
  Authenticated(Profile),
  /// Forced out because the profile reached a terminal status. Stays until
  /// the next sign-in.
  SuspendedOrDeleted(AccountStatus),
  /// Signed in, but the profile subscription is failing. Carries the last
  /// known profile, if there was one.
  OfflineStale(Option<Profile>),
}

impl SessionState {
  /// True for both plain and policy-forced sign-out.
  pub fn is_unauthenticated(&self) -> bool {
    matches!(self, Self::Unauthenticated | Self::SuspendedOrDeleted(_))
  }

  pub fn is_authenticated(&self) -> bool {
    matches!(self, Self::Authenticated(_))
  }

  /// The usable profile, whether fresh or stale.
  pub fn profile(&self) -> Option<&Profile> {
    match self {
      Self::Authenticated(p) | Self::OfflineStale(Some(p)) => Some(p),
      _ => None,
    }
  }
}

/// Everything a caller can observe about the session at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
  pub state:          SessionState,
  pub subject_id:     Option<SubjectId>,
  /// Set when the profile subscription last reported a transient error.
  pub offline:        bool,
  /// True from sign-in until the subscription delivers anything.
  pub loading:        bool,
  /// The last surfaced error, until cleared or until the next sign-in.
  pub error:          Option<ErrorKind>,
  /// Sequence number of the newest local write merged into the profile since
  /// the last authoritative snapshot; `None` when fully confirmed.
  pub optimistic_seq: Option<u64>,
}

impl SessionSnapshot {
  pub fn profile(&self) -> Option<&Profile> { self.state.profile() }
}
