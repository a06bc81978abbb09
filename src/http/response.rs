//! Mapping of errors and payloads onto HTTP responses

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::Error;

impl Error {
    /// Status code an HTTP route answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Auth => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::RoomNotFound(_) => StatusCode::NOT_FOUND,
            Error::NoNodesAvailable => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::ProbeFailed { .. } | Error::NodeUnreachable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        status.into_response()
    }
}

/// Pre-serialized JSON body
pub fn json_body(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}

/// Headers allowing browser clients on any origin
pub fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers
}

/// Answer to a CORS preflight, echoing the requested headers
pub fn preflight(request_headers: &HeaderMap) -> Response {
    let mut headers = cors_headers();
    if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    (StatusCode::OK, headers).into_response()
}
