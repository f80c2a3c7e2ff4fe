//! The reconciliation state machine.
//!
//! [`Reconciler`] is synchronous and owns no I/O. It consumes one [`Input`]
//! at a time and returns the [`Effect`]s the actor must carry out, in order.
//! The published value is always recomputed from its fields by
//! [`Reconciler::snapshot_value`].
//!
//! Every subscription the machine asks for is tagged with a fresh generation
//! number. Profile events carry the generation of the subscription that
//! produced them, and anything not tagged with the active generation is
//! dropped. This is what keeps a late event from a closed subscription out of
//! the published state.

use kindred_core::{
  ErrorKind,
  directory::ProfileEvent,
  identity::IdentityEvent,
  profile::{AccountStatus, Profile, ProfilePatch, SubjectId},
  session::{SessionSnapshot, SessionState},
};
use tracing::{debug, info, warn};

/// Something that happened, as seen by the reconciliation loop.
#[derive(Debug, Clone)]
pub(crate) enum Input {
  Identity(IdentityEvent),
  Profile { generation: u64, event: ProfileEvent },
  /// A confirmed local write to merge ahead of the next snapshot. `epoch` is
  /// the snapshot epoch read before the write was issued.
  Patch { subject_id: SubjectId, seq: u64, epoch: u64, patch: ProfilePatch },
  Surface(ErrorKind),
  ClearError,
}

/// Work the actor performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
  Open { subject_id: SubjectId, generation: u64 },
  Close,
  Revoke(SubjectId),
  TouchLastActive(SubjectId),
}

#[derive(Debug, Default)]
pub(crate) struct Reconciler {
  subject_id:     Option<SubjectId>,
  profile:        Option<Profile>,
  /// Generation of the open subscription, if any.
  active:         Option<u64>,
  next_gen:       u64,
  offline:        bool,
  loading:        bool,
  locked_out:     Option<AccountStatus>,
  error:          Option<ErrorKind>,
  optimistic_seq: Option<u64>,
  /// Number of snapshots adopted so far.
  snapshot_epoch: u64,
}

impl Reconciler {
  pub(crate) fn new() -> Self { Self::default() }

  pub(crate) fn snapshot_epoch(&self) -> u64 { self.snapshot_epoch }

  pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
    match input {
      Input::Identity(IdentityEvent::SignedIn(identity)) => {
        self.signed_in(identity.subject_id)
      }
      Input::Identity(IdentityEvent::SignedOut) => self.signed_out(),
      Input::Profile { generation, event } => {
        if self.active != Some(generation) {
          debug!(generation, active = ?self.active, "discarding stale profile event");
          return Vec::new();
        }
        match event {
          ProfileEvent::Snapshot(Some(profile)) => self.adopt(profile),
          ProfileEvent::Snapshot(None) => {
            debug!(subject_id = ?self.subject_id, "profile not created yet");
            self.loading = false;
            Vec::new()
          }
          ProfileEvent::TransientError(reason) => {
            warn!(subject_id = ?self.subject_id, %reason, "profile subscription degraded");
            self.offline = true;
            self.loading = false;
            Vec::new()
          }
        }
      }
      Input::Patch { subject_id, seq, epoch, patch } => {
        self.merge(subject_id, seq, epoch, &patch)
      }
      Input::Surface(kind) => {
        self.error = Some(kind);
        Vec::new()
      }
      Input::ClearError => {
        self.error = None;
        Vec::new()
      }
    }
  }

  fn signed_in(&mut self, subject_id: SubjectId) -> Vec<Effect> {
    if self.subject_id.as_ref() == Some(&subject_id) && self.active.is_some() {
      return Vec::new();
    }

    let mut effects = Vec::with_capacity(2);
    if self.active.take().is_some() {
      effects.push(Effect::Close);
    }

    self.next_gen += 1;
    let generation = self.next_gen;
    info!(%subject_id, generation, "signed in; opening profile subscription");

    self.subject_id = Some(subject_id.clone());
    self.active = Some(generation);
    self.profile = None;
    self.offline = false;
    self.loading = true;
    self.locked_out = None;
    self.error = None;
    self.optimistic_seq = None;

    effects.push(Effect::Open { subject_id, generation });
    effects
  }

  fn signed_out(&mut self) -> Vec<Effect> {
    let mut effects = Vec::new();
    if self.active.take().is_some() {
      effects.push(Effect::Close);
    }
    if let Some(subject_id) = self.subject_id.take() {
      info!(%subject_id, "signed out");
    }
    self.profile = None;
    self.offline = false;
    self.loading = false;
    self.optimistic_seq = None;
    effects
  }

  fn adopt(&mut self, profile: Profile) -> Vec<Effect> {
    let Some(subject_id) = self.subject_id.clone() else {
      return Vec::new();
    };
    if profile.subject_id != subject_id {
      warn!(%subject_id, got = %profile.subject_id, "snapshot for another subject");
      return Vec::new();
    }
    self.snapshot_epoch += 1;

    if profile.status.is_terminal() {
      return self.lock_out(subject_id, profile.status);
    }

    self.profile = Some(profile);
    self.offline = false;
    self.loading = false;
    self.optimistic_seq = None;
    vec![Effect::TouchLastActive(subject_id)]
  }

  /// End the session because the profile reached a terminal status.
  fn lock_out(&mut self, subject_id: SubjectId, status: AccountStatus) -> Vec<Effect> {
    warn!(%subject_id, %status, "terminal account status; revoking");
    self.active = None;
    self.subject_id = None;
    self.profile = None;
    self.offline = false;
    self.loading = false;
    self.optimistic_seq = None;
    self.locked_out = Some(status);
    self.error = Some(ErrorKind::PolicyViolation(status));
    vec![Effect::Close, Effect::Revoke(subject_id)]
  }

  fn merge(
    &mut self,
    subject_id: SubjectId,
    seq: u64,
    epoch: u64,
    patch: &ProfilePatch,
  ) -> Vec<Effect> {
    if self.subject_id.as_ref() != Some(&subject_id) {
      debug!(%subject_id, seq, "dropping write for a session that has ended");
      return Vec::new();
    }
    // A snapshot adopted after the write was issued already reflects it.
    if epoch != self.snapshot_epoch {
      debug!(
        %subject_id, seq, epoch, current = self.snapshot_epoch,
        "write superseded by snapshot"
      );
      return Vec::new();
    }
    let Some(profile) = self.profile.as_mut() else {
      debug!(%subject_id, seq, "no profile to merge into");
      return Vec::new();
    };
    profile.apply(patch);
    if profile.status.is_terminal() {
      let status = profile.status;
      return self.lock_out(subject_id, status);
    }
    self.optimistic_seq = Some(seq);
    Vec::new()
  }

  pub(crate) fn snapshot_value(&self) -> SessionSnapshot {
    let state = match (&self.subject_id, &self.profile) {
      (None, _) => match self.locked_out {
        Some(status) => SessionState::SuspendedOrDeleted(status),
        None => SessionState::Unauthenticated,
      },
      (Some(_), profile) if self.offline => {
        SessionState::OfflineStale(profile.clone())
      }
      (Some(_), Some(profile)) => SessionState::Authenticated(profile.clone()),
      (Some(_), None) => SessionState::Loading,
    };

    SessionSnapshot {
      state,
      subject_id: self.subject_id.clone(),
      offline: self.offline,
      loading: self.loading,
      error: self.error,
      optimistic_seq: self.optimistic_seq,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use kindred_core::{identity::Identity, profile::NewProfile};

  use super::*;

  fn profile(id: &str) -> Profile {
    NewProfile::new(id.to_uppercase()).into_profile(id.into(), "default", Utc::now())
  }

  fn with_status(id: &str, status: AccountStatus) -> Profile {
    Profile { status, ..profile(id) }
  }

  fn sign_in(r: &mut Reconciler, id: &str) -> Vec<Effect> {
    r.handle(Input::Identity(IdentityEvent::SignedIn(Identity::new(id))))
  }

  fn deliver(r: &mut Reconciler, generation: u64, event: ProfileEvent) -> Vec<Effect> {
    r.handle(Input::Profile { generation, event })
  }

  fn open_generation(effects: &[Effect]) -> u64 {
    effects
      .iter()
      .find_map(|e| match e {
        Effect::Open { generation, .. } => Some(*generation),
        _ => None,
      })
      .expect("an open effect")
  }

  #[test]
  fn starts_unauthenticated() {
    let r = Reconciler::new();
    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Unauthenticated);
    assert!(!s.loading);
    assert!(!s.offline);
  }

  #[test]
  fn sign_in_publishes_loading_and_opens() {
    let mut r = Reconciler::new();
    let effects = sign_in(&mut r, "u1");
    assert_eq!(effects, vec![Effect::Open { subject_id: "u1".into(), generation: 1 }]);
    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Loading);
    assert!(s.loading);
  }

  #[test]
  fn repeated_sign_in_for_same_subject_is_a_no_op() {
    let mut r = Reconciler::new();
    sign_in(&mut r, "u1");
    assert!(sign_in(&mut r, "u1").is_empty());
  }

  #[test]
  fn switching_subjects_closes_before_opening() {
    let mut r = Reconciler::new();
    sign_in(&mut r, "u1");
    let effects = sign_in(&mut r, "u2");
    assert_eq!(
      effects,
      vec![Effect::Close, Effect::Open { subject_id: "u2".into(), generation: 2 }]
    );
  }

  #[test]
  fn stale_generation_events_are_discarded() {
    let mut r = Reconciler::new();
    let g1 = open_generation(&sign_in(&mut r, "u1"));
    let g2 = open_generation(&sign_in(&mut r, "u2"));

    // A late delivery from u1's subscription must not reach published state.
    deliver(&mut r, g1, ProfileEvent::Snapshot(Some(profile("u1"))));
    assert_eq!(r.snapshot_value().state, SessionState::Loading);

    let p2 = profile("u2");
    deliver(&mut r, g2, ProfileEvent::Snapshot(Some(p2.clone())));
    assert_eq!(r.snapshot_value().state, SessionState::Authenticated(p2));
  }

  #[test]
  fn acceptable_snapshot_authenticates_and_touches() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    let p = profile("u1");
    let effects = deliver(&mut r, g, ProfileEvent::Snapshot(Some(p.clone())));
    assert_eq!(effects, vec![Effect::TouchLastActive("u1".into())]);

    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Authenticated(p));
    assert!(!s.loading);
    assert!(!s.offline);
  }

  #[test]
  fn absent_snapshot_keeps_session_pending() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    let effects = deliver(&mut r, g, ProfileEvent::Snapshot(None));
    assert!(effects.is_empty());

    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Loading);
    assert!(!s.state.is_unauthenticated());
    assert!(!s.loading);
  }

  #[test]
  fn absent_snapshot_leaves_known_profile_alone() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    let p = profile("u1");
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(p.clone())));
    deliver(&mut r, g, ProfileEvent::Snapshot(None));
    assert_eq!(r.snapshot_value().state, SessionState::Authenticated(p));
  }

  #[test]
  fn transient_error_retains_profile_and_goes_offline() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    let p = profile("u1");
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(p.clone())));
    deliver(&mut r, g, ProfileEvent::TransientError("unreachable".into()));

    let s = r.snapshot_value();
    assert!(s.offline);
    assert!(!s.loading);
    assert_eq!(s.profile(), Some(&p));
    assert_eq!(s.state, SessionState::OfflineStale(Some(p.clone())));

    // Recovery: the next good snapshot clears the offline flag.
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(p.clone())));
    let s = r.snapshot_value();
    assert!(!s.offline);
    assert_eq!(s.state, SessionState::Authenticated(p));
  }

  #[test]
  fn transient_error_while_loading_resolves_loading() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(&mut r, g, ProfileEvent::TransientError("denied".into()));
    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::OfflineStale(None));
    assert!(!s.loading);
    assert!(s.offline);
  }

  #[test]
  fn terminal_status_revokes_exactly_once() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(profile("u1"))));

    let banned = with_status("u1", AccountStatus::Banned);
    let effects = deliver(&mut r, g, ProfileEvent::Snapshot(Some(banned.clone())));
    assert_eq!(effects, vec![Effect::Close, Effect::Revoke("u1".into())]);

    let s = r.snapshot_value();
    assert!(s.state.is_unauthenticated());
    assert_eq!(s.state, SessionState::SuspendedOrDeleted(AccountStatus::Banned));
    assert_eq!(s.error, Some(ErrorKind::PolicyViolation(AccountStatus::Banned)));
    assert!(!s.loading);

    // A duplicate delivery from the closed subscription changes nothing.
    assert!(deliver(&mut r, g, ProfileEvent::Snapshot(Some(banned))).is_empty());
  }

  #[test]
  fn terminal_status_on_first_snapshot() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    let effects = deliver(
      &mut r,
      g,
      ProfileEvent::Snapshot(Some(with_status("u1", AccountStatus::Suspended))),
    );
    assert!(effects.contains(&Effect::Revoke("u1".into())));
    assert!(r.snapshot_value().state.is_unauthenticated());
  }

  #[test]
  fn sign_out_after_policy_violation_keeps_reason() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(
      &mut r,
      g,
      ProfileEvent::Snapshot(Some(with_status("u1", AccountStatus::Deleted))),
    );
    let effects = r.handle(Input::Identity(IdentityEvent::SignedOut));
    assert!(effects.is_empty());
    assert_eq!(
      r.snapshot_value().state,
      SessionState::SuspendedOrDeleted(AccountStatus::Deleted)
    );

    // Only a fresh sign-in leaves the locked-out state.
    sign_in(&mut r, "u1");
    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Loading);
    assert_eq!(s.error, None);
  }

  #[test]
  fn sign_out_clears_profile_and_closes() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(profile("u1"))));
    let effects = r.handle(Input::Identity(IdentityEvent::SignedOut));
    assert_eq!(effects, vec![Effect::Close]);

    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Unauthenticated);
    assert_eq!(s.subject_id, None);

    // Anything the old subscription still had in flight is ignored.
    assert!(deliver(&mut r, g, ProfileEvent::Snapshot(Some(profile("u1")))).is_empty());
    assert_eq!(r.snapshot_value().state, SessionState::Unauthenticated);
  }

  #[test]
  fn optimistic_patch_then_snapshot_wins() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    let p = profile("u1");
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(p.clone())));

    r.handle(Input::Patch {
      subject_id: "u1".into(),
      seq:        7,
      epoch:      r.snapshot_epoch(),
      patch:      ProfilePatch::blocked_ids(vec!["u2".into()]),
    });
    let s = r.snapshot_value();
    assert_eq!(s.optimistic_seq, Some(7));
    assert_eq!(s.profile().unwrap().blocked_ids, vec![SubjectId::from("u2")]);

    // The server's version is adopted verbatim, even if it disagrees.
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(p.clone())));
    let s = r.snapshot_value();
    assert_eq!(s.optimistic_seq, None);
    assert_eq!(s.state, SessionState::Authenticated(p));
  }

  #[test]
  fn patch_for_previous_subject_is_dropped() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(profile("u1"))));
    let g2 = open_generation(&sign_in(&mut r, "u2"));
    deliver(&mut r, g2, ProfileEvent::Snapshot(Some(profile("u2"))));

    r.handle(Input::Patch {
      subject_id: "u1".into(),
      seq:        1,
      epoch:      r.snapshot_epoch(),
      patch:      ProfilePatch::blocked_ids(vec!["u3".into()]),
    });
    let s = r.snapshot_value();
    assert!(s.profile().unwrap().blocked_ids.is_empty());
    assert_eq!(s.optimistic_seq, None);
  }

  #[test]
  fn patch_issued_before_latest_snapshot_is_dropped() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(profile("u1"))));
    let epoch = r.snapshot_epoch();

    // The directory's copy of the write arrives before the write returns.
    let server = Profile { display_name: "Padded".into(), ..profile("u1") };
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(server.clone())));

    let effects = r.handle(Input::Patch {
      subject_id: "u1".into(),
      seq: 1,
      epoch,
      patch: ProfilePatch { display_name: Some("  Padded  ".into()), ..Default::default() },
    });
    assert!(effects.is_empty());
    let s = r.snapshot_value();
    assert_eq!(s.state, SessionState::Authenticated(server));
    assert_eq!(s.optimistic_seq, None);
  }

  #[test]
  fn merged_soft_delete_ends_the_session() {
    let mut r = Reconciler::new();
    let g = open_generation(&sign_in(&mut r, "u1"));
    deliver(&mut r, g, ProfileEvent::TransientError("unreachable".into()));
    deliver(&mut r, g, ProfileEvent::Snapshot(Some(profile("u1"))));

    let effects = r.handle(Input::Patch {
      subject_id: "u1".into(),
      seq:        1,
      epoch:      r.snapshot_epoch(),
      patch:      ProfilePatch::soft_delete(),
    });
    assert_eq!(effects, vec![Effect::Close, Effect::Revoke("u1".into())]);

    let s = r.snapshot_value();
    assert!(!s.state.is_authenticated());
    assert_eq!(s.state, SessionState::SuspendedOrDeleted(AccountStatus::Deleted));
    assert_eq!(s.error, Some(ErrorKind::PolicyViolation(AccountStatus::Deleted)));

    // The directory's own copy of the deletion revokes nothing further.
    let deleted = with_status("u1", AccountStatus::Deleted);
    assert!(deliver(&mut r, g, ProfileEvent::Snapshot(Some(deleted))).is_empty());
  }

  #[test]
  fn surfaced_errors_clear_on_request() {
    let mut r = Reconciler::new();
    r.handle(Input::Surface(ErrorKind::WrongCredentials));
    let s = r.snapshot_value();
    assert_eq!(s.error, Some(ErrorKind::WrongCredentials));
    assert_eq!(s.state, SessionState::Unauthenticated);

    r.handle(Input::ClearError);
    assert_eq!(r.snapshot_value().error, None);
  }
}
