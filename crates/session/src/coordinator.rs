//! Reactive refresh coordinator
//!
//! Requests rejected with a 401 wait here for a renewed credential. The first
//! one starts a refresh; any that arrive while it runs are queued and receive
//! the same outcome when it completes.

use crate::refresh::{RefreshError, TokenRefresher};
use crate::signal::{AuthEvent, AuthSignal};
use crate::token::TokenHolder;
use codelab_core::Credential;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<Credential, RefreshError>>;

#[derive(Default)]
struct State {
    is_refreshing: bool,
    pending: Vec<Waiter>,
}

/// Single-flight refresh with a pending queue
#[derive(Clone)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<State>>,
    refresher: TokenRefresher,
    holder: TokenHolder,
    signal: AuthSignal,
}

impl RefreshCoordinator {
    pub(crate) fn new(refresher: TokenRefresher, holder: TokenHolder, signal: AuthSignal) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            refresher,
            holder,
            signal,
        }
    }

    /// Wait for a renewed credential, starting a refresh if none is running
    ///
    /// The refresh runs on its own task, so dropping this future never strands
    /// the other waiters.
    pub async fn renewed_credential(&self) -> Result<Credential, RefreshError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.pending.push(tx);
            if state.is_refreshing {
                debug!(queued = state.pending.len(), "Refresh in flight, queueing request");
            } else {
                state.is_refreshing = true;
                self.spawn_refresh();
            }
        }

        rx.await
            .unwrap_or_else(|_| Err(RefreshError::Failed("refresh task ended".into())))
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().is_refreshing
    }

    /// Clear the session and tell listeners it is gone
    pub(crate) fn fail_session(&self, reason: &str) {
        warn!("Session ended: {reason}");
        self.holder.set(None);
        self.signal.emit(AuthEvent::Failed);
    }

    fn spawn_refresh(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.refresher.refresh().await;
            if let Err(e) = &outcome {
                this.fail_session(&e.to_string());
            }

            let pending = {
                let mut state = this.state.lock();
                state.is_refreshing = false;
                std::mem::take(&mut state.pending)
            };
            debug!(waiters = pending.len(), ok = outcome.is_ok(), "Draining refresh queue");
            for waiter in pending {
                // Waiter may have been dropped
                let _ = waiter.send(outcome.clone());
            }
        });
    }
}
