//! Submission API client methods

use super::{ClientError, MultipartField, RequestSpec, endpoints};
use crate::types::{RunRequest, SubmitRequest};
use codelab_core::{SubmissionId, SubmissionUpdate};
use reqwest::StatusCode;
use serde_json::Value;

/// Locations of the job id in submission responses, checked in order
const JOB_ID_POINTERS: [&str; 4] = ["/data/submissionId", "/data/id", "/submissionId", "/id"];

/// `POST /submissions/run`
pub fn run_request(request: &RunRequest) -> Result<RequestSpec, ClientError> {
    RequestSpec::post(endpoints::RUN).json(request)
}

/// `POST /submissions` with a JSON body
pub fn submit_request(request: &SubmitRequest) -> Result<RequestSpec, ClientError> {
    RequestSpec::post(endpoints::SUBMISSIONS).json(request)
}

/// `POST /submissions` with the source uploaded as a file part
pub fn submit_upload_request(
    request: &SubmitRequest,
    file_name: impl Into<String>,
) -> RequestSpec {
    let mut fields = vec![
        MultipartField::text("problemId", request.problem_id.clone()),
        MultipartField::text("language", request.language.clone()),
        MultipartField::file(
            "file",
            file_name,
            Some("text/plain".to_string()),
            request.code.clone().into_bytes(),
        ),
    ];
    if let Some(exam_id) = &request.exam_id {
        fields.push(MultipartField::text("examId", exam_id.clone()));
    }
    RequestSpec::post(endpoints::SUBMISSIONS).multipart(fields)
}

/// `GET /submissions/{id}`
pub fn status_request(id: &SubmissionId) -> RequestSpec {
    RequestSpec::get(endpoints::submission(id))
}

/// Pull the job id out of a submission response
pub fn job_id(body: &Value) -> Result<SubmissionId, ClientError> {
    JOB_ID_POINTERS
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .find_map(|id| match id {
            Value::String(s) if !s.is_empty() => Some(SubmissionId::new(s.clone())),
            Value::Number(n) => Some(SubmissionId::new(n.to_string())),
            _ => None,
        })
        .ok_or_else(|| ClientError::UnexpectedResponse("no submission id in response".into()))
}

/// Check the accept status of `POST /submissions` and pull out the job id
pub fn accepted_job_id(status: StatusCode, body: &Value) -> Result<SubmissionId, ClientError> {
    if status != StatusCode::CREATED && status != StatusCode::OK {
        return Err(ClientError::UnexpectedResponse(format!(
            "submission not accepted: {status}"
        )));
    }
    job_id(body)
}

/// Decode a poll response, enveloped in `data` or bare
///
/// A missing id is filled in from the job being polled.
pub fn status_update(id: &SubmissionId, body: Value) -> Result<SubmissionUpdate, ClientError> {
    let mut inner = match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    };
    if let Value::Object(map) = &mut inner {
        // `id` is an alias of `submissionId`; both present would be a duplicate field
        if map.contains_key("submissionId") {
            map.remove("id");
        } else if !map.contains_key("id") {
            map.insert("submissionId".into(), Value::String(id.to_string()));
        }
    }
    Ok(serde_json::from_value(inner)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelab_core::JudgeStatus;
    use serde_json::json;

    #[test]
    fn test_job_id_shapes() {
        assert_eq!(job_id(&json!({"data": {"submissionId": "s1"}})).unwrap().as_str(), "s1");
        assert_eq!(job_id(&json!({"data": {"id": 42}})).unwrap().as_str(), "42");
        assert_eq!(job_id(&json!({"submissionId": "s3"})).unwrap().as_str(), "s3");
        assert_eq!(job_id(&json!({"id": "s4"})).unwrap().as_str(), "s4");
        assert!(job_id(&json!({"data": {}})).is_err());
    }

    #[test]
    fn test_submit_requires_created_or_ok() {
        let body = json!({"id": "s1"});
        assert!(accepted_job_id(StatusCode::CREATED, &body).is_ok());
        assert!(accepted_job_id(StatusCode::ACCEPTED, &body).is_err());
    }

    #[test]
    fn test_status_update_envelope() {
        let id = SubmissionId::new("s1");
        let body = json!({"data": {"status": "wrong_answer", "passed": 1, "total": 3}});
        let update = status_update(&id, body).unwrap();
        assert_eq!(update.submission_id, id);
        assert_eq!(update.status, JudgeStatus::WrongAnswer);
        assert_eq!(update.total, Some(3));
    }

    #[test]
    fn test_numeric_job_id_polls_to_verdict() {
        let accepted = json!({"data": {"id": 42}});
        let id = job_id(&accepted).unwrap();

        let body = json!({"data": {"id": 42, "status": "accepted", "passed": 2, "total": 2}});
        let update = status_update(&id, body).unwrap();
        assert_eq!(update.submission_id, id);
        assert_eq!(update.status, JudgeStatus::Accepted);

        let body = json!({"submissionId": 42, "status": "running"});
        assert_eq!(status_update(&id, body).unwrap().submission_id.as_str(), "42");
    }

    #[test]
    fn test_upload_carries_exam_id() {
        let request = SubmitRequest {
            problem_id: "p1".into(),
            language: "rust".into(),
            code: "fn main() {}".into(),
            exam_id: Some("e1".into()),
        };
        let spec = submit_upload_request(&request, "main.rs");
        let crate::Payload::Multipart(fields) = spec.payload else {
            panic!("expected multipart payload");
        };
        assert!(fields.iter().any(|f| f.name == "examId"));
    }
}
