//! Uniform response envelope.
//!
//! Every reply body is `{statusCode, status, data}`. Unauthorized replies are
//! the exception: status line only, empty body.

use crate::validation::Issue;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Business-level negative outcome of an operation.
///
/// Each operation declares its own closed enum of reasons; the HTTP status
/// is a static property of the reason.
pub trait FailReason: Serialize {
    fn status_code(&self) -> StatusCode;
}

/// Fail reason type for operations that cannot fail at the business level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoFail {}

impl FailReason for NoFail {
    fn status_code(&self) -> StatusCode {
        match *self {}
    }
}

/// Envelope status label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Invalid,
    Fail,
    Error,
}

/// A complete API reply
#[derive(Debug)]
pub enum Envelope<T, F = NoFail> {
    /// 200 with the operation result
    Success(T),
    /// 400 with the validation issues
    Invalid(Vec<Issue>),
    /// Per-reason status with the reason tag
    Fail(F),
    /// 500 with an error message
    Error(String),
    /// 401, empty body
    Unauthorized,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Body<D> {
    status_code: u16,
    status: Status,
    data: D,
}

fn reply<D: Serialize>(code: StatusCode, status: Status, data: D) -> Response {
    let body = Body {
        status_code: code.as_u16(),
        status,
        data,
    };
    (code, Json(body)).into_response()
}

impl<T, F> IntoResponse for Envelope<T, F>
where
    T: Serialize,
    F: FailReason,
{
    fn into_response(self) -> Response {
        match self {
            Envelope::Success(data) => reply(StatusCode::OK, Status::Success, data),
            Envelope::Invalid(issues) => reply(StatusCode::BAD_REQUEST, Status::Invalid, issues),
            Envelope::Fail(reason) => reply(reason.status_code(), Status::Fail, reason),
            Envelope::Error(message) => {
                reply(StatusCode::INTERNAL_SERVER_ERROR, Status::Error, message)
            }
            Envelope::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, Copy, Serialize)]
    #[serde(rename_all = "snake_case")]
    enum LookupFail {
        ThingNotFound,
        ThingLocked,
    }

    impl FailReason for LookupFail {
        fn status_code(&self) -> StatusCode {
            match self {
                LookupFail::ThingNotFound => StatusCode::NOT_FOUND,
                LookupFail::ThingLocked => StatusCode::CONFLICT,
            }
        }
    }

    async fn body_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn success_wraps_data() {
        let response = Envelope::<_, NoFail>::Success("abc").into_response();
        let (status, body) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"statusCode": 200, "status": "success", "data": "abc"})
        );
    }

    #[tokio::test]
    async fn fail_takes_status_from_reason() {
        let response = Envelope::<(), _>::Fail(LookupFail::ThingLocked).into_response();
        let (status, body) = body_json(response).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["statusCode"], 409);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["data"], "thing_locked");

        let response = Envelope::<(), _>::Fail(LookupFail::ThingNotFound).into_response();
        let (status, body) = body_json(response).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"], "thing_not_found");
    }

    #[tokio::test]
    async fn error_carries_message() {
        let response = Envelope::<(), NoFail>::Error("disk on fire".to_string()).into_response();
        let (status, body) = body_json(response).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"statusCode": 500, "status": "error", "data": "disk on fire"})
        );
    }

    #[tokio::test]
    async fn invalid_lists_issues() {
        let issues = vec![Issue::required("object").at(&["body", "data"])];
        let response = Envelope::<(), NoFail>::Invalid(issues).into_response();
        let (status, body) = body_json(response).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "invalid");
        assert_eq!(body["data"][0]["code"], "invalid_type");
        assert_eq!(body["data"][0]["message"], "Required");
    }

    #[tokio::test]
    async fn unauthorized_has_empty_body() {
        let response = Envelope::<(), NoFail>::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }
}
