//! Codelab HTTP client

pub mod auth;
pub mod endpoints;
pub mod error;
pub mod interceptor;
pub mod request;
pub mod submissions;

pub use error::ClientError;
pub use request::{MultipartField, MultipartValue, Payload, RequestSpec};

use codelab_core::Credential;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("codelab-client/", env!("CARGO_PKG_VERSION"));

/// Codelab API client
///
/// Stateless with respect to credentials: the caller passes the credential to
/// use on each call. The underlying transport keeps a cookie store so the
/// server-set refresh cookie is carried to `/auth/refresh-token`.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn a request description into a ready-to-send request
    fn request(
        &self,
        spec: &RequestSpec,
        credential: Option<&Credential>,
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let url = format!("{}{}", self.base_url, spec.path);
        let builder = self.client.request(spec.method.clone(), url);
        interceptor::intercept(builder, &spec.payload, credential)
    }

    /// Send a request and decode its JSON body
    pub async fn send<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        credential: Option<&Credential>,
    ) -> Result<T, ClientError> {
        self.send_with_status(spec, credential)
            .await
            .map(|(_, body)| body)
    }

    /// Send a request and decode its JSON body, keeping the success status
    pub async fn send_with_status<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        credential: Option<&Credential>,
    ) -> Result<(StatusCode, T), ClientError> {
        debug!(
            method = %spec.method,
            path = %spec.path,
            retry = spec.retry_count,
            authenticated = credential.is_some(),
            "Sending request"
        );
        let request = self.request(spec, credential)?;
        Self::execute(request).await
    }

    /// Execute a request, returning the success status alongside the body
    ///
    /// An empty success body decodes as JSON `null`.
    async fn execute<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, T), ClientError> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await?;
            let body = if bytes.iter().all(u8::is_ascii_whitespace) {
                serde_json::from_value(serde_json::Value::Null)?
            } else {
                serde_json::from_slice(&bytes)?
            };
            Ok((status, body))
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            debug!(status = status.as_u16(), "Request failed");
            Err(ClientError::from_status(status, message))
        }
    }
}

/// Builder for ApiClient
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl ApiClientBuilder {
    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        url::Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base_url {base_url}: {e}")))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new().cookie_store(true);

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.user_agent(USER_AGENT).build()?;

        Ok(ApiClient { client, base_url })
    }
}
