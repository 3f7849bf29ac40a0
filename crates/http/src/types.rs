//! Request bodies sent to the platform API

use serde::{Deserialize, Serialize};

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Ephemeral run of source code against a problem's sample cases
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub problem_id: String,
    pub language: String,
    pub code: String,
    /// Custom stdin; the sample cases are used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

/// Graded submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub problem_id: String,
    pub language: String,
    pub code: String,
    /// Set when submitting as part of a timed exam
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
}
