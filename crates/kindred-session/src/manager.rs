//! [`SessionManager`] — the owned session engine and its actor task.
//!
//! All reconciliation runs on one spawned task that owns the
//! [`Reconciler`] and the [`SubscriptionSlot`]. Everything else (the identity
//! watcher, subscription forwarders, the mutation gateway) talks to it
//! through a single bounded inbox, so transitions never run concurrently.

use std::sync::Arc;
use std::time::Duration;

use kindred_core::{
  Error, Result,
  directory::DirectoryService,
  identity::{Credentials, IdentityProvider},
  profile::{ProfilePatch, SubjectId},
  session::SessionSnapshot,
};
use tokio::{
  sync::{mpsc, oneshot, watch},
  task::JoinHandle,
  time::Instant,
};
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::{
  config::SessionConfig,
  gateway::{MutationGateway, spawn_touch},
  identity::watch_identity,
  reconcile::{Effect, Input, Reconciler},
  subscription::SubscriptionSlot,
};

// ─── Inbox ───────────────────────────────────────────────────────────────────

/// Messages accepted by the session actor.
pub(crate) enum Command {
  Input(Input),
  /// Reply with the current snapshot epoch.
  Stamp(oneshot::Sender<u64>),
  /// Merge a confirmed write, then acknowledge once the result is published.
  Patch {
    subject_id: SubjectId,
    seq:        u64,
    epoch:      u64,
    patch:      ProfilePatch,
    applied:    oneshot::Sender<()>,
  },
  Shutdown,
}

// ─── SessionManager ──────────────────────────────────────────────────────────

/// The single owner of a user's session.
///
/// The published [`SessionSnapshot`] is the only observable mutable value;
/// read it with [`snapshot`](Self::snapshot) or follow it with
/// [`subscribe`](Self::subscribe). Profile writes go through
/// [`mutations`](Self::mutations).
pub struct SessionManager<I, D> {
  identity: Arc<I>,
  gateway:  MutationGateway<I, D>,
  inbox:    mpsc::Sender<Command>,
  state:    watch::Receiver<SessionSnapshot>,
  actor:    JoinHandle<()>,
  watcher:  JoinHandle<()>,
}

impl<I, D> SessionManager<I, D>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  /// Spawn the session actor and the identity watcher on the current tokio
  /// runtime.
  pub fn start(identity: Arc<I>, directory: Arc<D>, config: SessionConfig) -> Self {
    let (inbox, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
    let (state_tx, state) = watch::channel(SessionSnapshot::default());

    let actor = Actor {
      reconciler:     Reconciler::new(),
      slot:           SubscriptionSlot::default(),
      identity:       identity.clone(),
      directory:      directory.clone(),
      inbox:          inbox.downgrade(),
      inbox_rx,
      state:          state_tx,
      touch_interval: config.touch_interval(),
      last_touch:     None,
    };
    let actor = tokio::spawn(actor.run().instrument(info_span!("session")));
    let watcher = tokio::spawn(
      watch_identity(identity.clone(), inbox.clone()).instrument(info_span!("identity")),
    );

    let gateway = MutationGateway::new(
      identity.clone(),
      directory,
      inbox.clone(),
      state.clone(),
      config.default_tenant,
    );

    Self { identity, gateway, inbox, state, actor, watcher }
  }

  /// The current published value.
  pub fn snapshot(&self) -> SessionSnapshot { self.state.borrow().clone() }

  /// A receiver that is notified whenever the published value changes.
  pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> { self.state.clone() }

  /// Wait until the published value satisfies `predicate`.
  pub async fn wait_for(
    &self,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
  ) -> Result<SessionSnapshot> {
    let mut rx = self.state.clone();
    rx.wait_for(predicate)
      .await
      .map(|snapshot| snapshot.clone())
      .map_err(|_| Error::SessionClosed)
  }

  pub fn mutations(&self) -> &MutationGateway<I, D> { &self.gateway }

  /// Ask the provider to sign in. The resulting session state arrives through
  /// the identity feed; failures are returned and also published.
  pub async fn sign_in(
    &self,
    email: impl Into<String>,
    password: impl Into<String>,
  ) -> Result<()> {
    let credentials = Credentials::new(email, password);
    if let Err(e) = credentials.validate() {
      return Err(self.gateway.surface(e).await);
    }
    match self.identity.sign_in(credentials).await {
      Ok(identity) => {
        info!(subject_id = %identity.subject_id, "sign-in accepted");
        Ok(())
      }
      Err(e) => Err(self.gateway.surface(Error::from(e)).await),
    }
  }

  pub async fn sign_out(&self) -> Result<()> {
    self.identity.sign_out().await.map_err(Error::from)
  }

  /// Acknowledge the last surfaced error.
  pub async fn clear_error(&self) -> Result<()> {
    self
      .inbox
      .send(Command::Input(Input::ClearError))
      .await
      .map_err(|_| Error::SessionClosed)
  }

  /// Close the profile subscription and stop the actor. Later calls on this
  /// manager fail with [`Error::SessionClosed`].
  pub async fn shutdown(&self) {
    self.watcher.abort();
    if self.inbox.send(Command::Shutdown).await.is_err() {
      debug!("session actor already stopped");
    }
  }
}

impl<I, D> Drop for SessionManager<I, D> {
  fn drop(&mut self) {
    self.watcher.abort();
    self.actor.abort();
  }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

struct Actor<I, D> {
  reconciler:     Reconciler,
  slot:           SubscriptionSlot,
  identity:       Arc<I>,
  directory:      Arc<D>,
  /// Weak so that the actor alone does not keep its own inbox open.
  inbox:          mpsc::WeakSender<Command>,
  inbox_rx:       mpsc::Receiver<Command>,
  state:          watch::Sender<SessionSnapshot>,
  touch_interval: Duration,
  last_touch:     Option<Instant>,
}

impl<I, D> Actor<I, D>
where
  I: IdentityProvider + 'static,
  D: DirectoryService + 'static,
{
  async fn run(mut self) {
    debug!("session actor started");
    while let Some(command) = self.inbox_rx.recv().await {
      match command {
        Command::Input(input) => self.apply(input),
        Command::Stamp(reply) => {
          let _ = reply.send(self.reconciler.snapshot_epoch());
        }
        Command::Patch { subject_id, seq, epoch, patch, applied } => {
          self.apply(Input::Patch { subject_id, seq, epoch, patch });
          // The writer may have given up waiting; nothing to do then.
          let _ = applied.send(());
        }
        Command::Shutdown => break,
      }
    }
    self.slot.close();
    debug!("session actor stopped");
  }

  fn apply(&mut self, input: Input) {
    for effect in self.reconciler.handle(input) {
      self.execute(effect);
    }
    self.publish();
  }

  fn execute(&mut self, effect: Effect) {
    match effect {
      Effect::Open { subject_id, generation } => {
        let Some(inbox) = self.inbox.upgrade() else {
          return;
        };
        self.last_touch = None;
        self.slot.open(self.directory.clone(), subject_id, generation, inbox);
      }
      Effect::Close => self.slot.close(),
      Effect::Revoke(subject_id) => {
        let identity = self.identity.clone();
        tokio::spawn(async move {
          match identity.revoke(subject_id.clone()).await {
            Ok(()) => info!(%subject_id, "identity revoked"),
            Err(e) => warn!(%subject_id, error = %e, "failed to revoke identity"),
          }
        });
      }
      Effect::TouchLastActive(subject_id) => {
        let now = Instant::now();
        if self
          .last_touch
          .is_some_and(|at| now.duration_since(at) < self.touch_interval)
        {
          return;
        }
        self.last_touch = Some(now);
        spawn_touch(self.directory.clone(), subject_id);
      }
    }
  }

  fn publish(&self) {
    let next = self.reconciler.snapshot_value();
    self.state.send_if_modified(|current| {
      if *current == next {
        return false;
      }
      *current = next;
      true
    });
  }
}
