//! Authenticated session
//!
//! [`AuthSession`] is the entry point for talking to the platform: every call
//! made through [`AuthSession::send`] carries the held credential, and a 401
//! is answered with one refresh and one replay.

use crate::config::{ConfigError, PipelineConfig};
use crate::coordinator::RefreshCoordinator;
use crate::refresh::{ProfileSlot, TokenRefresher};
use crate::signal::{AuthEvent, AuthSignal};
use crate::token::{FileSessionCache, TokenHolder};
use codelab_core::{Credential, SubmissionId, SubmissionUpdate, UserProfile};
use codelab_http::client::{auth, endpoints, submissions};
use codelab_http::types::{LoginRequest, RegisterRequest, RunRequest, SubmitRequest};
use codelab_http::{ApiClient, ClientError, RequestSpec};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthSession {
    client: ApiClient,
    holder: TokenHolder,
    refresher: TokenRefresher,
    coordinator: RefreshCoordinator,
    signal: AuthSignal,
    profile: ProfileSlot,
}

impl AuthSession {
    /// Wire a session from its parts
    pub fn new(client: ApiClient, holder: TokenHolder, signal: AuthSignal) -> Self {
        let profile = ProfileSlot::default();
        let refresher = TokenRefresher::new(client.clone(), holder.clone(), profile.clone());
        holder.register_refresh(refresher.callback());
        let coordinator = RefreshCoordinator::new(refresher.clone(), holder.clone(), signal.clone());

        Self {
            client,
            holder,
            refresher,
            coordinator,
            signal,
            profile,
        }
    }

    /// Session using the configured endpoints, cache and the process-wide signal
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let client = ApiClient::builder()
            .base_url(&config.api_base_url)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let holder = match &config.session_cache {
            Some(path) => TokenHolder::with_cache(Arc::new(FileSessionCache::new(path))),
            None => TokenHolder::new(),
        };

        Ok(Self::new(client, holder, AuthSignal::global()))
    }

    pub const fn client(&self) -> &ApiClient {
        &self.client
    }

    pub const fn tokens(&self) -> &TokenHolder {
        &self.holder
    }

    pub const fn signal(&self) -> &AuthSignal {
        &self.signal
    }

    pub const fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.profile.read().clone()
    }

    /// Sign in and load the user's profile
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, ClientError> {
        let credential = self
            .client
            .login(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.establish(credential).await
    }

    /// Create an account and sign in as it
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, ClientError> {
        let credential = self
            .client
            .register(&RegisterRequest {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.establish(credential).await
    }

    /// Sign out; the local session is cleared even if the server call fails
    pub async fn logout(&self) {
        if let Err(e) = self.client.logout(self.holder.get().as_ref()).await {
            warn!("Logout request failed: {e}");
        }
        self.holder.set(None);
        *self.profile.write() = None;
        info!("Logged out");
        self.signal.emit(AuthEvent::LoggedOut);
    }

    async fn establish(&self, credential: Credential) -> Result<UserProfile, ClientError> {
        self.holder.set(Some(credential.clone()));
        let profile = match self.client.me(&credential).await {
            Ok(profile) => profile,
            Err(e) => {
                self.holder.set(None);
                return Err(e);
            }
        };
        *self.profile.write() = Some(profile.clone());
        info!(user = %profile.username, "Logged in");
        self.signal.emit(AuthEvent::LoggedIn);
        Ok(profile)
    }

    /// Reload the signed-in user's profile
    pub async fn fetch_profile(&self) -> Result<UserProfile, ClientError> {
        let body: Value = self.send(RequestSpec::get(endpoints::ME)).await?;
        let profile = auth::extract_profile(&body)?;
        *self.profile.write() = Some(profile.clone());
        Ok(profile)
    }

    /// Send a request with the held credential, refreshing once on a 401
    pub async fn send<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T, ClientError> {
        self.send_with_status(spec).await.map(|(_, body)| body)
    }

    /// Like [`send`](Self::send), also returning the success status
    pub async fn send_with_status<T: DeserializeOwned>(
        &self,
        spec: RequestSpec,
    ) -> Result<(StatusCode, T), ClientError> {
        let credential = self.holder.get();
        let error = match self.client.send_with_status(&spec, credential.as_ref()).await {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };

        if spec.is_auth_flow() || spec.retry_count >= 1 {
            return Err(error);
        }
        if error.is_refresh_credential_invalid() {
            self.coordinator.fail_session(&error.to_string());
            return Err(error);
        }

        debug!(path = %spec.path, "Request unauthorized, awaiting refresh");
        let credential = self.coordinator.renewed_credential().await?;
        self.client
            .send_with_status(&spec.replay(), Some(&credential))
            .await
    }

    /// Start an ephemeral run
    pub async fn run(&self, request: &RunRequest) -> Result<SubmissionId, ClientError> {
        let body: Value = self.send(submissions::run_request(request)?).await?;
        submissions::job_id(&body)
    }

    /// Submit a solution for grading
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmissionId, ClientError> {
        let (status, body): (_, Value) = self
            .send_with_status(submissions::submit_request(request)?)
            .await?;
        submissions::accepted_job_id(status, &body)
    }

    /// Submit a solution uploaded as a source file
    pub async fn submit_file(
        &self,
        request: &SubmitRequest,
        file_name: &str,
    ) -> Result<SubmissionId, ClientError> {
        let spec = submissions::submit_upload_request(request, file_name);
        let (status, body): (_, Value) = self.send_with_status(spec).await?;
        submissions::accepted_job_id(status, &body)
    }

    /// Poll a judging job once
    pub async fn submission_status(
        &self,
        id: &SubmissionId,
    ) -> Result<SubmissionUpdate, ClientError> {
        let body: Value = self.send(submissions::status_request(id)).await?;
        submissions::status_update(id, body)
    }
}
