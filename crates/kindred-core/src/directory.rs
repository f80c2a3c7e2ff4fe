//! The `DirectoryService` trait — the remote owner of profiles and reports.
//!
//! The trait is implemented by backends (e.g. `kindred-store-sqlite`). The
//! session engine depends on this abstraction, not on any concrete backend.

use std::future::Future;

use tokio::sync::mpsc;

use crate::{
  error::DirectoryError,
  profile::{Profile, ProfilePatch, SubjectId},
  report::Report,
};

/// One delivery on a live profile subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
  /// The full current document. `None` means it does not exist yet, which
  /// is a pending state (e.g. registration still writing), not a deletion.
  Snapshot(Option<Profile>),
  /// Connectivity or permission failure of unknown cause. The subscription
  /// may keep delivering afterwards.
  TransientError(String),
}

/// Receiving end of a profile subscription. Dropping it unsubscribes.
pub type ProfileFeed = mpsc::Receiver<ProfileEvent>;

/// Abstraction over the directory backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait DirectoryService: Send + Sync {
  /// Start streaming snapshots of `subject_id`'s profile. The first event is
  /// the current state of the document.
  fn subscribe_profile(
    &self,
    subject_id: SubjectId,
  ) -> impl Future<Output = Result<ProfileFeed, DirectoryError>> + Send + '_;

  /// Apply `patch` to an existing profile.
  ///
  /// Fails with `PermissionDenied` when the patch touches something the
  /// caller may not change, `Unavailable` on transport failure.
  fn write_profile(
    &self,
    subject_id: SubjectId,
    patch: ProfilePatch,
  ) -> impl Future<Output = Result<(), DirectoryError>> + Send + '_;

  /// Store a freshly registered profile.
  fn create_profile(
    &self,
    profile: Profile,
  ) -> impl Future<Output = Result<(), DirectoryError>> + Send + '_;

  fn create_report(
    &self,
    report: Report,
  ) -> impl Future<Output = Result<(), DirectoryError>> + Send + '_;

  /// Record that `subject_id` was active just now.
  fn touch_last_active(
    &self,
    subject_id: SubjectId,
  ) -> impl Future<Output = Result<(), DirectoryError>> + Send + '_;
}
