use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Enumeration of errors surfaced at the control-plane boundary.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("timed out waiting for {0} to answer")]
    ServiceTimeout(&'static str),
    #[error("test {0} is not known")]
    TestNotFound(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        match self {
            OrchestratorError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            OrchestratorError::TestNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            OrchestratorError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            OrchestratorError::ServiceTimeout(_) => {
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::OrchestratorError;

    #[test]
    fn errors_map_to_the_documented_statuses() {
        let cases = [
            (
                OrchestratorError::BadRequest("x".to_string()).into_response(),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::TestNotFound("t".to_string()).into_response(),
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestratorError::ServiceUnavailable("full".to_string()).into_response(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::ServiceTimeout("queue").into_response(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (response, expected) in cases {
            assert_eq!(response.status(), expected);
        }
    }
}
