use axum::body::Body;
use axum::response::Response;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};

use kgate_protocol::claude::ErrorResponse;
use kgate_protocol::openai::{ErrorBody, ErrorDetail};
use kgate_provider_core::ProviderError;

/// Caller surface an error is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFlavor {
    OpenAi,
    Anthropic,
}

impl ErrorFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorFlavor::OpenAi => "openai",
            ErrorFlavor::Anthropic => "anthropic",
        }
    }
}

/// Anthropic error `type` for a status.
fn anthropic_kind(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        413 => "request_too_large",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        _ => "api_error",
    }
}

/// A failed gateway call. Rendered as an OpenAI-style error object or an
/// Anthropic error envelope.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ProxyError {
    pub fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: ErrorDetail {
                    message: message.into(),
                    kind: kind.to_string(),
                    code: None,
                },
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found_error", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn into_response(self, flavor: ErrorFlavor) -> Response {
        let body = match flavor {
            ErrorFlavor::OpenAi => serde_json::to_vec(&self.body),
            ErrorFlavor::Anthropic => serde_json::to_vec(&ErrorResponse::new(
                anthropic_kind(self.status),
                self.body.error.message,
            )),
        }
        .unwrap_or_default();
        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = self.status;
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        resp
    }
}

impl From<&ProviderError> for ProxyError {
    fn from(err: &ProviderError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut out = Self::new(status, err.kind(), err.to_string());
        out.body.error.code = err.stage().map(|stage| stage.as_str().to_string());
        out
    }
}

impl From<ProviderError> for ProxyError {
    fn from(err: ProviderError) -> Self {
        Self::from(&err)
    }
}
