//! Refresh with backoff
//!
//! All refresh triggers (the proactive timer and the reactive coordinator)
//! share one in-flight refresh: a caller arriving while a refresh runs awaits
//! the same outcome instead of issuing a second `/auth/refresh-token` call.

use crate::config::AuthConfig;
use crate::token::{RefreshCallback, TokenHolder};
use codelab_core::{Credential, UserProfile};
use codelab_http::{ApiClient, ClientError};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Profile of the signed-in user, shared by the session and the refresher
pub(crate) type ProfileSlot = Arc<RwLock<Option<UserProfile>>>;

type InFlight = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

/// Refresh failure; cloned to every waiter of the shared refresh
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// The refresh credential is missing, expired or rejected
    #[error("Refresh rejected: {0}")]
    Terminal(String),

    /// Network or server failures persisted through every retry
    #[error("Refresh failed after retries: {0}")]
    Exhausted(String),

    /// Any other failure, including an unrecognised response
    #[error("Refresh failed: {0}")]
    Failed(String),
}

impl RefreshError {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

struct Inner {
    client: ApiClient,
    holder: TokenHolder,
    profile: ProfileSlot,
    in_flight: Mutex<Option<InFlight>>,
}

/// Deduplicated refresh-with-backoff
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<Inner>,
}

impl TokenRefresher {
    pub(crate) fn new(client: ApiClient, holder: TokenHolder, profile: ProfileSlot) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                holder,
                profile,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Refresh the credential, joining a refresh already in flight
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        let shared = {
            let mut slot = self.inner.in_flight.lock();
            if let Some(in_flight) = slot.as_ref() {
                debug!("Joining in-flight refresh");
                in_flight.clone()
            } else {
                let this = self.clone();
                let fut = async move {
                    let outcome = this.refresh_with_backoff().await;
                    *this.inner.in_flight.lock() = None;
                    outcome
                }
                .boxed()
                .shared();
                *slot = Some(fut.clone());
                fut
            }
        };
        shared.await
    }

    /// Callback for the token holder's proactive timer
    ///
    /// Captures the refresher weakly so the holder does not keep it alive.
    pub(crate) fn callback(&self) -> RefreshCallback {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let refresher = weak.upgrade().map(|inner| Self { inner });
            async move {
                match refresher {
                    Some(refresher) => refresher.refresh().await,
                    None => Err(RefreshError::Failed("session closed".into())),
                }
            }
            .boxed()
        })
    }

    async fn refresh_with_backoff(&self) -> Result<Credential, RefreshError> {
        let mut delays = AuthConfig::REFRESH_BACKOFF.iter();
        let mut attempt = 1;

        loop {
            match self.inner.client.refresh_token().await {
                Ok(credential) => {
                    info!(attempt, "Access credential refreshed");
                    self.inner.holder.set(Some(credential.clone()));
                    self.load_profile(&credential).await;
                    return Ok(credential);
                }
                Err(e) if e.is_unauthorized() || e.is_refresh_credential_invalid() => {
                    info!("Refresh rejected: {e}");
                    return Err(RefreshError::Terminal(e.to_string()));
                }
                Err(e) if e.is_transient() => match delays.next() {
                    Some(delay) => {
                        warn!(attempt, ?delay, "Refresh failed, retrying: {e}");
                        tokio::time::sleep(*delay).await;
                        attempt += 1;
                    }
                    None => return Err(RefreshError::Exhausted(e.to_string())),
                },
                Err(e) => return Err(RefreshError::Failed(e.to_string())),
            }
        }
    }

    async fn load_profile(&self, credential: &Credential) {
        match self.inner.client.me(credential).await {
            Ok(profile) => *self.inner.profile.write() = Some(profile),
            Err(e) => warn!("Failed to load profile after refresh: {e}"),
        }
    }
}

impl From<RefreshError> for ClientError {
    fn from(e: RefreshError) -> Self {
        Self::SessionExpired(e.to_string())
    }
}
