use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use sequencer_protocol::http::{error_codes, HttpErrorEnvelope};
use std::fmt::Display;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub(crate) fn json_error(status: StatusCode, code: &str, message: impl Display) -> HttpResponse {
    (status, Json(HttpErrorEnvelope::new(code, message.to_string()))).into_response()
}

pub(crate) fn json_error_with_details(
    status: StatusCode,
    code: &str,
    message: impl Display,
    details: Vec<String>,
) -> HttpResponse {
    (status, Json(HttpErrorEnvelope::with_details(code, message.to_string(), details))).into_response()
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL, err)
}

pub fn bad_request(message: impl Display) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, error_codes::VALIDATION, message)
}

pub fn validation_failed(message: impl Display, details: Vec<String>) -> HttpResponse {
    json_error_with_details(StatusCode::BAD_REQUEST, error_codes::VALIDATION, message, details)
}

pub fn not_found(message: impl Display) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, message)
}

pub fn conflict(message: impl Display) -> HttpResponse {
    json_error(StatusCode::CONFLICT, error_codes::ALREADY_PUBLISHED, message)
}

/// A mutating request against an already-published (immutable) session.
/// Distinct from `conflict`/`ALREADY_PUBLISHED`, which is reserved for
/// publishing an already-published session a second time.
pub fn immutable(message: impl Display) -> HttpResponse {
    json_error(StatusCode::CONFLICT, error_codes::IMMUTABLE, message)
}

pub fn payload_too_large(message: impl Display) -> HttpResponse {
    json_error(StatusCode::PAYLOAD_TOO_LARGE, error_codes::PAYLOAD_TOO_LARGE, message)
}

pub fn bad_session_id(message: impl Display) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, error_codes::BAD_SESSION_ID, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error_response(response: Response, expected_status: StatusCode, expected_code: &str) {
        assert_eq!(response.status(), expected_status);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, expected_code);
    }

    #[tokio::test]
    async fn bad_request_sets_validation_contract() {
        assert_error_response(bad_request("invalid query"), StatusCode::BAD_REQUEST, error_codes::VALIDATION).await;
    }

    #[tokio::test]
    async fn not_found_sets_not_found_contract() {
        assert_error_response(not_found("session missing"), StatusCode::NOT_FOUND, error_codes::NOT_FOUND).await;
    }

    #[tokio::test]
    async fn conflict_sets_already_published_contract() {
        assert_error_response(conflict("already published"), StatusCode::CONFLICT, error_codes::ALREADY_PUBLISHED).await;
    }

    #[tokio::test]
    async fn immutable_sets_immutable_contract() {
        assert_error_response(immutable("session is published"), StatusCode::CONFLICT, error_codes::IMMUTABLE).await;
    }

    #[tokio::test]
    async fn validation_failed_carries_details() {
        let response = validation_failed("bad payload", vec!["tempo out of range".to_owned()]);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.details, vec!["tempo out of range".to_owned()]);
    }
}
