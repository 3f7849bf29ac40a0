//! Authentication API client methods

use super::{ApiClient, ClientError, RequestSpec, endpoints};
use crate::types::{LoginRequest, RegisterRequest};
use codelab_core::{Credential, UserProfile};
use serde_json::Value;

/// Locations of the access token in auth responses, checked in order
const ACCESS_TOKEN_POINTERS: [&str; 3] = ["/data/tokens/accessToken", "/data/accessToken", "/accessToken"];

/// Locations of the user object in `/auth/me` responses, checked in order
const PROFILE_POINTERS: [&str; 4] = ["/data/user", "/data", "/user", ""];

impl ApiClient {
    /// Sign in with username and password
    pub async fn login(&self, request: &LoginRequest) -> Result<Credential, ClientError> {
        let spec = RequestSpec::post(endpoints::LOGIN).json(request)?;
        let body: Value = self.send(&spec, None).await?;
        extract_access_token(&body)
    }

    /// Create an account; the server signs the new user in
    pub async fn register(&self, request: &RegisterRequest) -> Result<Credential, ClientError> {
        let spec = RequestSpec::post(endpoints::REGISTER).json(request)?;
        let body: Value = self.send(&spec, None).await?;
        extract_access_token(&body)
    }

    /// Exchange the refresh cookie for a new access credential
    pub async fn refresh_token(&self) -> Result<Credential, ClientError> {
        let spec = RequestSpec::post(endpoints::REFRESH_TOKEN);
        let body: Value = self.send(&spec, None).await?;
        extract_access_token(&body)
    }

    /// Invalidate the server-side session
    pub async fn logout(&self, credential: Option<&Credential>) -> Result<(), ClientError> {
        let spec = RequestSpec::post(endpoints::LOGOUT);
        let _: Value = self.send(&spec, credential).await?;
        Ok(())
    }

    /// Fetch the signed-in user's profile
    pub async fn me(&self, credential: &Credential) -> Result<UserProfile, ClientError> {
        let body: Value = self.send(&RequestSpec::get(endpoints::ME), Some(credential)).await?;
        extract_profile(&body)
    }
}

/// Find the access token in any of the accepted response shapes
pub fn extract_access_token(body: &Value) -> Result<Credential, ClientError> {
    ACCESS_TOKEN_POINTERS
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(Credential::new)
        .ok_or_else(|| ClientError::UnexpectedResponse("no access token in response".into()))
}

/// Find the user object in a `/auth/me` response
pub fn extract_profile(body: &Value) -> Result<UserProfile, ClientError> {
    PROFILE_POINTERS
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .filter(|candidate| candidate.get("username").is_some())
        .find_map(|candidate| {
            let mut candidate = candidate.clone();
            // Numeric ids are common
            if let Some(id) = candidate.get_mut("id").filter(|id| id.is_number()) {
                *id = Value::String(id.to_string());
            }
            serde_json::from_value(candidate).ok()
        })
        .ok_or_else(|| ClientError::UnexpectedResponse("no user profile in response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_shapes_in_priority_order() {
        let nested = json!({"data": {"tokens": {"accessToken": "a"}, "accessToken": "b"}});
        assert_eq!(extract_access_token(&nested).unwrap().as_str(), "a");

        let data = json!({"data": {"accessToken": "b"}});
        assert_eq!(extract_access_token(&data).unwrap().as_str(), "b");

        let flat = json!({"accessToken": "c"});
        assert_eq!(extract_access_token(&flat).unwrap().as_str(), "c");
    }

    #[test]
    fn test_missing_token_is_unexpected() {
        let body = json!({"data": {"token": "x"}});
        assert!(matches!(
            extract_access_token(&body),
            Err(ClientError::UnexpectedResponse(_))
        ));
        assert!(extract_access_token(&json!({"accessToken": ""})).is_err());
    }

    #[test]
    fn test_profile_shapes() {
        let wrapped = json!({"data": {"user": {"id": 7, "username": "ada", "role": "admin"}}});
        let profile = extract_profile(&wrapped).unwrap();
        assert_eq!(profile.id, "7");
        assert!(profile.is_admin());

        let flat = json!({"id": "u1", "username": "bob", "email": "bob@example.com"});
        let profile = extract_profile(&flat).unwrap();
        assert_eq!(profile.username, "bob");
        assert_eq!(profile.email.as_deref(), Some("bob@example.com"));
    }
}
