//! Process-wide authentication signal

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

/// Session transitions observed by the rest of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    LoggedOut,
    /// The session could not be renewed; the user must sign in again
    Failed,
}

static GLOBAL: Lazy<AuthSignal> = Lazy::new(AuthSignal::new);

/// Broadcast of [`AuthEvent`]s
#[derive(Clone, Debug)]
pub struct AuthSignal {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthSignal {
    /// Create an isolated signal
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// The process-wide signal
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: AuthEvent) {
        debug!(?event, "Auth event");
        // No listeners is fine
        let _ = self.tx.send(event);
    }
}

impl Default for AuthSignal {
    fn default() -> Self {
        Self::new()
    }
}
