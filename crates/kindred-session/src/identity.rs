//! Adapter from the provider's broadcast feed to the session inbox.

use std::sync::Arc;

use kindred_core::identity::{IdentityEvent, IdentityProvider};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, warn};

use crate::{manager::Command, reconcile::Input};

fn current_as_event<I: IdentityProvider>(provider: &I) -> IdentityEvent {
  match provider.current() {
    Some(identity) => IdentityEvent::SignedIn(identity),
    None => IdentityEvent::SignedOut,
  }
}

/// Forward identity changes until the provider's feed closes or the inbox
/// goes away.
///
/// Subscribes before reading the current identity so that no change can fall
/// between the two. Duplicates are harmless; the reconciler ignores a repeat
/// sign-in for the subject it already follows.
pub(crate) async fn watch_identity<I: IdentityProvider>(
  provider: Arc<I>,
  inbox: mpsc::Sender<Command>,
) {
  let mut events = provider.observe();
  let mut next = Some(current_as_event(provider.as_ref()));

  loop {
    let event = match next.take() {
      Some(event) => event,
      None => match events.recv().await {
        Ok(event) => event,
        Err(RecvError::Lagged(skipped)) => {
          warn!(skipped, "identity feed lagged; resynchronising");
          current_as_event(provider.as_ref())
        }
        Err(RecvError::Closed) => {
          debug!("identity feed closed");
          return;
        }
      },
    };

    if inbox.send(Command::Input(Input::Identity(event))).await.is_err() {
      return;
    }
  }
}
