//! Codelab core types and utilities

pub mod credential;
pub mod error;
pub mod judge;
pub mod types;

pub use credential::Credential;
pub use error::{CoreError, CoreResult};
pub use judge::{
    CaseVisibility, JobKind, JudgeStatus, SubmissionState, SubmissionUpdate, TestCaseResult,
};
pub use types::{SubmissionId, UserProfile, UserRole};
