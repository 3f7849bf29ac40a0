//! Outbound request decoration

use super::ClientError;
use super::request::{Payload, build_form};
use codelab_core::Credential;
use reqwest::RequestBuilder;

/// Attach the bearer credential and body to an outbound request
///
/// Multipart bodies are handed to the transport untouched so it can write the
/// boundary into the content type; no content type is forced for them.
pub fn intercept(
    builder: RequestBuilder,
    payload: &Payload,
    credential: Option<&Credential>,
) -> Result<RequestBuilder, ClientError> {
    let builder = match credential {
        Some(credential) => builder.bearer_auth(credential.as_str()),
        None => builder,
    };

    Ok(match payload {
        Payload::Empty => builder,
        Payload::Json(body) => builder.json(body),
        Payload::Multipart(fields) => builder.multipart(build_form(fields)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::request::MultipartField;
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

    fn builder() -> RequestBuilder {
        reqwest::Client::new().post("http://localhost/submissions")
    }

    #[test]
    fn test_bearer_attached_when_held() {
        let credential = Credential::new("tok");
        let request = intercept(builder(), &Payload::Empty, Some(&credential))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn test_no_header_without_credential() {
        let request = intercept(builder(), &Payload::Empty, None)
            .unwrap()
            .build()
            .unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_json_payload_sets_json_content_type() {
        let request = intercept(builder(), &Payload::Json(serde_json::json!({"a": 1})), None)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_multipart_keeps_transport_boundary() {
        let payload = Payload::Multipart(vec![MultipartField::text("k", "v")]);
        let request = intercept(builder(), &payload, Some(&Credential::new("tok")))
            .unwrap()
            .build()
            .unwrap();
        let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
    }
}
