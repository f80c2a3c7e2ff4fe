//! Lifecycle of the one live profile subscription.
//!
//! The slot holds at most one forwarding task. Opening always closes first,
//! and every event a forwarder delivers carries the generation it was opened
//! with, so the reconciler can recognise and drop anything a superseded
//! forwarder managed to enqueue before it was aborted.

use std::{sync::Arc, time::Duration};

use kindred_core::{
  directory::{DirectoryService, ProfileEvent},
  profile::SubjectId,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{manager::Command, reconcile::Input};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct ActiveSubscription {
  subject_id: SubjectId,
  generation: u64,
  task:       JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct SubscriptionSlot {
  active: Option<ActiveSubscription>,
}

impl SubscriptionSlot {
  pub(crate) fn open<D>(
    &mut self,
    directory: Arc<D>,
    subject_id: SubjectId,
    generation: u64,
    inbox: mpsc::Sender<Command>,
  ) where
    D: DirectoryService + 'static,
  {
    self.close();
    debug!(%subject_id, generation, "opening profile subscription");
    let task = tokio::spawn(forward(directory, subject_id.clone(), generation, inbox));
    self.active = Some(ActiveSubscription { subject_id, generation, task });
  }

  /// Idempotent.
  pub(crate) fn close(&mut self) {
    if let Some(active) = self.active.take() {
      debug!(
        subject_id = %active.subject_id,
        generation = active.generation,
        "closing profile subscription"
      );
      active.task.abort();
    }
  }

  #[cfg(test)]
  pub(crate) fn generation(&self) -> Option<u64> {
    self.active.as_ref().map(|a| a.generation)
  }
}

impl Drop for SubscriptionSlot {
  fn drop(&mut self) { self.close(); }
}

fn tagged(generation: u64, event: ProfileEvent) -> Command {
  Command::Input(Input::Profile { generation, event })
}

/// Pump one subject's profile feed into the inbox until aborted.
///
/// A failed subscribe or an ended feed is reported as a transient error and
/// retried with capped exponential backoff under the same generation.
async fn forward<D: DirectoryService>(
  directory: Arc<D>,
  subject_id: SubjectId,
  generation: u64,
  inbox: mpsc::Sender<Command>,
) {
  let mut backoff = INITIAL_BACKOFF;
  loop {
    let reason = match directory.subscribe_profile(subject_id.clone()).await {
      Ok(mut feed) => {
        while let Some(event) = feed.recv().await {
          if matches!(event, ProfileEvent::Snapshot(_)) {
            backoff = INITIAL_BACKOFF;
          }
          if inbox.send(tagged(generation, event)).await.is_err() {
            return;
          }
        }
        "profile subscription ended".to_owned()
      }
      Err(e) => e.to_string(),
    };

    warn!(%subject_id, generation, %reason, retry_in = ?backoff, "profile feed interrupted");
    if inbox
      .send(tagged(generation, ProfileEvent::TransientError(reason)))
      .await
      .is_err()
    {
      return;
    }
    tokio::time::sleep(backoff).await;
    backoff = (backoff * 2).min(MAX_BACKOFF);
  }
}
