//! Replayable request descriptions

use super::{ClientError, endpoints};
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

/// Endpoints that take part in the auth flow itself and must never trigger a refresh
pub const AUTH_FLOW_PATHS: [&str; 3] = [endpoints::LOGIN, endpoints::REFRESH_TOKEN, endpoints::LOGOUT];

/// Body of an outbound request
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<MultipartField>),
}

#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

#[derive(Debug, Clone)]
pub enum MultipartValue {
    Text(String),
    File {
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::File {
                file_name: file_name.into(),
                mime,
                bytes,
            },
        }
    }
}

/// Build a fresh multipart form; forms are consumed on send so each attempt needs its own
pub(crate) fn build_form(fields: &[MultipartField]) -> Result<Form, ClientError> {
    let mut form = Form::new();
    for field in fields {
        form = match &field.value {
            MultipartValue::Text(text) => form.text(field.name.clone(), text.clone()),
            MultipartValue::File {
                file_name,
                mime,
                bytes,
            } => {
                let mut part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    part = part.mime_str(mime)?;
                }
                form.part(field.name.clone(), part)
            }
        };
    }
    Ok(form)
}

/// Everything needed to (re)issue one API call
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub payload: Payload,
    /// Number of times this request has already been replayed after a refresh
    pub retry_count: u8,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: Payload::Empty,
            retry_count: 0,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        self.payload = Payload::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Attach a multipart body
    #[must_use]
    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.payload = Payload::Multipart(fields);
        self
    }

    /// Whether this call belongs to the login/refresh/logout flow
    pub fn is_auth_flow(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        AUTH_FLOW_PATHS.contains(&path)
    }

    /// Copy of this request marked as a replay
    #[must_use]
    pub fn replay(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }
}
