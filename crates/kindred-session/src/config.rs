//! Runtime configuration for a [`SessionManager`](crate::SessionManager).

use std::time::Duration;

use serde::Deserialize;

/// Tunables for the session engine. Every field has a default, so an empty
/// `[session]` table is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  /// Tenant stamped on every newly registered profile.
  pub default_tenant:      String,
  /// Capacity of the reconciliation inbox.
  pub inbox_capacity:      usize,
  /// Minimum gap between two last-active touches for the same session. `0`
  /// touches on every adopted snapshot.
  pub touch_interval_secs: u64,
}

impl SessionConfig {
  pub fn touch_interval(&self) -> Duration {
    Duration::from_secs(self.touch_interval_secs)
  }
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      default_tenant:      "default".into(),
      inbox_capacity:      64,
      touch_interval_secs: 0,
    }
  }
}
