//! Push channel for submission status events
//!
//! Frames are JSON objects `{"event": <name>, "data": <payload>}`. The client
//! joins a job's room with `join_submission`, leaves it with
//! `leave_submission`, and receives `submission_update` events.

use crate::token::TokenHolder;
use async_trait::async_trait;
use codelab_core::{SubmissionId, SubmissionUpdate};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_util::sync::CancellationToken;

pub const JOIN_SUBMISSION: &str = "join_submission";
pub const LEAVE_SUBMISSION: &str = "leave_submission";
pub const SUBMISSION_UPDATE: &str = "submission_update";

/// Buffered updates per subscription
const SUBSCRIPTION_BUFFER: usize = 32;

#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("Push channel connection failed: {0}")]
    Connect(String),

    #[error("Push channel closed")]
    Closed,
}

/// Per-job notification stream
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Start receiving updates for a job
    async fn subscribe(
        &self,
        id: &SubmissionId,
    ) -> Result<mpsc::Receiver<SubmissionUpdate>, PushError>;

    /// Stop receiving updates for a job
    async fn unsubscribe(&self, id: &SubmissionId);
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    fn room(event: &str, id: &SubmissionId) -> Self {
        Self {
            event: event.to_string(),
            data: json!({ "submissionId": id }),
        }
    }
}

type Routes = Arc<Mutex<HashMap<SubmissionId, mpsc::Sender<SubmissionUpdate>>>>;

/// One socket and the subscriptions made over it
///
/// Routes belong to the connection that joined them, so a reader task
/// winding down never touches subscriptions made after a reconnect.
struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    routes: Routes,
    shutdown: CancellationToken,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !self.shutdown.is_cancelled()
    }

    /// Add a subscriber unless the reader task has already shut down
    fn register(
        &self,
        id: &SubmissionId,
        tx: mpsc::Sender<SubmissionUpdate>,
    ) -> Result<(), PushError> {
        let mut routes = self.routes.lock();
        if self.shutdown.is_cancelled() {
            return Err(PushError::Closed);
        }
        routes.insert(id.clone(), tx);
        Ok(())
    }

    fn send(&self, frame: &Frame) -> Result<(), PushError> {
        let text = serde_json::to_string(frame).map_err(|e| PushError::Connect(e.to_string()))?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| PushError::Closed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// WebSocket push channel, connected lazily on first subscription
pub struct SocketPushChannel {
    url: String,
    holder: TokenHolder,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl SocketPushChannel {
    pub fn new(url: impl Into<String>, holder: TokenHolder) -> Self {
        Self {
            url: url.into(),
            holder,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection, PushError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| PushError::Connect(e.to_string()))?;
        if let Some(credential) = self.holder.get() {
            let value = HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
                .map_err(|e| PushError::Connect(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!(url = %self.url, "Connecting push channel");
        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| PushError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let shutdown = CancellationToken::new();
        let routes = Routes::default();
        let task_routes = routes.clone();
        let token = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        let _ = write.close().await;
                        break;
                    }
                    Some(msg) = outbound_rx.recv() => {
                        if let Err(e) = write.send(msg).await {
                            warn!("Push channel send failed: {e}");
                            break;
                        }
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => route(&task_routes, text.as_str()),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Push channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Push channel error: {e}");
                            break;
                        }
                    }
                }
            }
            let mut routes = task_routes.lock();
            token.cancel();
            // Dropping the senders ends every subscriber's stream
            routes.clear();
        });

        Ok(Connection {
            outbound,
            routes,
            shutdown,
        })
    }
}

/// Deliver a `submission_update` frame to its job's subscriber
fn route(routes: &Routes, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring malformed push frame: {e}");
            return;
        }
    };
    if frame.event != SUBMISSION_UPDATE {
        return;
    }
    let update: SubmissionUpdate = match serde_json::from_value(frame.data) {
        Ok(update) => update,
        Err(e) => {
            debug!("Ignoring malformed submission update: {e}");
            return;
        }
    };

    let sender = routes.lock().get(&update.submission_id).cloned();
    if let Some(sender) = sender
        && sender.try_send(update).is_err()
    {
        warn!("Dropping push update for a full or closed subscription");
    }
}

#[async_trait]
impl PushChannel for SocketPushChannel {
    async fn subscribe(
        &self,
        id: &SubmissionId,
    ) -> Result<mpsc::Receiver<SubmissionUpdate>, PushError> {
        let mut slot = self.connection.lock().await;
        if !slot.as_ref().is_some_and(Connection::is_open) {
            *slot = Some(self.connect().await?);
        }
        let Some(connection) = slot.as_ref() else {
            return Err(PushError::Closed);
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        connection.register(id, tx)?;
        if let Err(e) = connection.send(&Frame::room(JOIN_SUBMISSION, id)) {
            connection.routes.lock().remove(id);
            return Err(e);
        }
        debug!(submission = %id, "Subscribed to push updates");
        Ok(rx)
    }

    async fn unsubscribe(&self, id: &SubmissionId) {
        let slot = self.connection.lock().await;
        let Some(connection) = slot.as_ref() else {
            return;
        };
        if connection.routes.lock().remove(id).is_none() {
            return;
        }
        if connection.is_open() {
            let _ = connection.send(&Frame::room(LEAVE_SUBMISSION, id));
        }
        debug!(submission = %id, "Unsubscribed from push updates");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelab_core::JudgeStatus;

    fn routes_with(id: &str) -> (Routes, mpsc::Receiver<SubmissionUpdate>) {
        let routes: Routes = Arc::default();
        let (tx, rx) = mpsc::channel(4);
        routes.lock().insert(SubmissionId::new(id), tx);
        (routes, rx)
    }

    #[test]
    fn test_join_frame_shape() {
        let frame = Frame::room(JOIN_SUBMISSION, &SubmissionId::new("S1"));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"event": "join_submission", "data": {"submissionId": "S1"}}));
    }

    #[test]
    fn test_routes_update_to_matching_job() {
        let (routes, mut rx) = routes_with("S1");
        route(
            &routes,
            r#"{"event":"submission_update","data":{"submissionId":"S1","status":"running"}}"#,
        );
        route(
            &routes,
            r#"{"event":"submission_update","data":{"submissionId":"S2","status":"accepted"}}"#,
        );

        let update = rx.try_recv().unwrap();
        assert_eq!(update.status, JudgeStatus::Running);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_routes_numeric_job_id() {
        let (routes, mut rx) = routes_with("42");
        route(
            &routes,
            r#"{"event":"submission_update","data":{"submissionId":42,"status":"accepted"}}"#,
        );

        let update = rx.try_recv().unwrap();
        assert_eq!(update.submission_id.as_str(), "42");
        assert_eq!(update.status, JudgeStatus::Accepted);
    }

    #[test]
    fn test_ignores_other_events_and_garbage() {
        let (routes, mut rx) = routes_with("S1");
        route(&routes, r#"{"event":"notification","data":{"submissionId":"S1"}}"#);
        route(&routes, "not json");
        assert!(rx.try_recv().is_err());
    }
}
