use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use serde::Serialize;

use webthing::ErrorKind;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    description: &'a str,
}

/// Returns the status code matching a Thing [`ErrorKind`].
#[must_use]
pub const fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::UnknownName | ErrorKind::UnknownId => StatusCode::NOT_FOUND,
        ErrorKind::ForwardRejected
        | ErrorKind::ActionExecution
        | ErrorKind::SubscriberDelivery
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A response providing details about an error encountered while serving a
/// request.
///
/// The body is a `JSON` object containing the error category and a
/// description of what went wrong.
pub struct ErrorResponse(Response);

impl ErrorResponse {
    /// Generates an [`ErrorResponse`].
    ///
    /// Requires specifying a status code, an error category and a general
    /// description.
    #[must_use]
    #[inline]
    pub fn with_description(status: StatusCode, error: &str, description: &str) -> Self {
        let body = ErrorBody { error, description };
        Self((status, Json(body)).into_response())
    }

    /// Generates an [`ErrorResponse`] for a malformed request.
    #[must_use]
    #[inline]
    pub fn bad_request(description: &str) -> Self {
        Self::with_description(StatusCode::BAD_REQUEST, "Bad Request", description)
    }

    /// Generates an [`ErrorResponse`] for a missing resource.
    #[must_use]
    #[inline]
    pub fn not_found(description: &str) -> Self {
        Self::with_description(StatusCode::NOT_FOUND, "Not Found", description)
    }

    /// Generates an [`ErrorResponse`] for a request with a disallowed `Host`
    /// header.
    #[must_use]
    #[inline]
    pub fn forbidden(description: &str) -> Self {
        Self::with_description(StatusCode::FORBIDDEN, "Forbidden", description)
    }

    /// Generates an [`ErrorResponse`] for an internal error.
    #[must_use]
    #[inline]
    pub fn internal(description: &str) -> Self {
        Self::with_description(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            description,
        )
    }
}

impl From<webthing::Error> for ErrorResponse {
    fn from(e: webthing::Error) -> Self {
        Self::with_description(
            status_code(e.kind()),
            &e.kind().to_string(),
            e.description(),
        )
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        self.0
    }
}
