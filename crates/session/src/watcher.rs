//! Submission status watcher
//!
//! Tracks one judging job to a terminal verdict using both the push channel
//! and periodic polls. Both channels feed the same [`SubmissionState`], which
//! ignores regressions and anything after a terminal status, so duplicated or
//! out-of-order deliveries are harmless.

use crate::config::WatchConfig;
use crate::push::PushChannel;
use crate::session::AuthSession;
use async_trait::async_trait;
use codelab_core::{JobKind, SubmissionId, SubmissionState, SubmissionUpdate};
use codelab_http::ClientError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("Session expired while watching submission {0}")]
    SessionExpired(SubmissionId),

    #[error("Watch cancelled")]
    Cancelled,
}

/// Where poll results come from
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, id: &SubmissionId) -> Result<SubmissionUpdate, ClientError>;
}

#[async_trait]
impl StatusSource for AuthSession {
    async fn fetch_status(&self, id: &SubmissionId) -> Result<SubmissionUpdate, ClientError> {
        self.submission_status(id).await
    }
}

/// Starts watches for submitted jobs
#[derive(Clone)]
pub struct SubmissionWatcher {
    source: Arc<dyn StatusSource>,
    push: Option<Arc<dyn PushChannel>>,
}

impl SubmissionWatcher {
    /// Poll-only watcher
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self { source, push: None }
    }

    #[must_use]
    pub fn with_push(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    /// Begin watching a job that the server has just accepted
    pub fn watch(&self, id: SubmissionId, kind: JobKind) -> WatchHandle {
        let (state_tx, state_rx) = watch::channel(SubmissionState::new(id.clone(), kind));
        let cancel = CancellationToken::new();

        let task = WatchTask {
            id,
            kind,
            source: self.source.clone(),
            push: self.push.clone(),
            state_tx,
            cancel: cancel.clone(),
        };

        WatchHandle {
            state: state_rx,
            cancel,
            task: Some(tokio::spawn(task.run())),
        }
    }
}

/// Live view of a watched job; dropping it stops the watch
pub struct WatchHandle {
    state: watch::Receiver<SubmissionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<SubmissionState, WatchError>>>,
}

impl WatchHandle {
    /// Latest known state
    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every applied update
    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.state.clone()
    }

    /// Stop both channels; in-flight poll results are discarded
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal state
    pub async fn wait(mut self) -> Result<SubmissionState, WatchError> {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(Err(WatchError::Cancelled)),
            None => Err(WatchError::Cancelled),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct WatchTask {
    id: SubmissionId,
    kind: JobKind,
    source: Arc<dyn StatusSource>,
    push: Option<Arc<dyn PushChannel>>,
    state_tx: watch::Sender<SubmissionState>,
    cancel: CancellationToken,
}

impl WatchTask {
    async fn run(self) -> Result<SubmissionState, WatchError> {
        let mut push_rx = self.subscribe_push().await;
        let mut subscribed = push_rx.is_some();

        let push_deadline = tokio::time::sleep(push_timeout(self.kind));
        tokio::pin!(push_deadline);

        // First tick completes immediately
        let mut poll = tokio::time::interval(WatchConfig::POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break Err(WatchError::Cancelled),

                update = next_push(&mut push_rx) => match update {
                    Some(update) => {
                        if self.kind == JobKind::Submit {
                            push_deadline.as_mut().reset(Instant::now() + WatchConfig::SUBMIT_PUSH_SILENCE);
                        }
                        if self.apply(&update) {
                            break Ok(self.state_tx.borrow().clone());
                        }
                    }
                    None => {
                        debug!(submission = %self.id, "Push stream ended, polling only");
                        push_rx = None;
                    }
                },

                () = &mut push_deadline, if push_rx.is_some() => {
                    warn!(submission = %self.id, kind = ?self.kind, "No push updates in time, polling only");
                    push_rx = None;
                    self.unsubscribe_push().await;
                    subscribed = false;
                }

                _ = poll.tick() => {
                    let result = tokio::select! {
                        () = self.cancel.cancelled() => break Err(WatchError::Cancelled),
                        result = self.source.fetch_status(&self.id) => result,
                    };
                    match result {
                        Ok(update) => {
                            if self.apply(&update) {
                                break Ok(self.state_tx.borrow().clone());
                            }
                        }
                        Err(e) if is_session_failure(&e) => {
                            break Err(WatchError::SessionExpired(self.id.clone()));
                        }
                        Err(e) => warn!(submission = %self.id, "Status poll failed: {e}"),
                    }
                }
            }
        };

        if subscribed {
            self.unsubscribe_push().await;
        }
        if let Ok(state) = &outcome {
            info!(submission = %self.id, "Judging finished: {}", state.summary());
        }
        outcome
    }

    async fn subscribe_push(&self) -> Option<mpsc::Receiver<SubmissionUpdate>> {
        let push = self.push.as_ref()?;
        match push.subscribe(&self.id).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(submission = %self.id, "Push subscription failed, polling only: {e}");
                None
            }
        }
    }

    async fn unsubscribe_push(&self) {
        if let Some(push) = &self.push {
            push.unsubscribe(&self.id).await;
        }
    }

    /// Apply an update; true once the job is terminal
    fn apply(&self, update: &SubmissionUpdate) -> bool {
        let mut terminal = false;
        self.state_tx.send_if_modified(|state| {
            let changed = state.apply(update);
            terminal = state.is_terminal();
            changed
        });
        terminal
    }
}

const fn push_timeout(kind: JobKind) -> std::time::Duration {
    match kind {
        JobKind::Run => WatchConfig::RUN_PUSH_TIMEOUT,
        JobKind::Submit => WatchConfig::SUBMIT_PUSH_SILENCE,
    }
}

async fn next_push(rx: &mut Option<mpsc::Receiver<SubmissionUpdate>>) -> Option<SubmissionUpdate> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn is_session_failure(e: &ClientError) -> bool {
    matches!(e, ClientError::SessionExpired(_)) || e.is_unauthorized()
}
