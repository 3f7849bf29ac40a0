//! REST paths

pub const LOGIN: &str = "/auth/login";
pub const REGISTER: &str = "/auth/register";
pub const REFRESH_TOKEN: &str = "/auth/refresh-token";
pub const LOGOUT: &str = "/auth/logout";
pub const ME: &str = "/auth/me";

pub const RUN: &str = "/submissions/run";
pub const SUBMISSIONS: &str = "/submissions";

/// Poll path for one judging job
pub fn submission(id: &codelab_core::SubmissionId) -> String {
    format!("{SUBMISSIONS}/{id}")
}
