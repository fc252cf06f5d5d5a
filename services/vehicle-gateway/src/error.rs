use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use smartcar_client::SmartcarError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("webhook signature is missing or invalid")]
    SignatureInvalid,
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },
    #[error("invalid request: {message}")]
    Validation { message: String },
    #[error("vehicle authorization expired, re-authentication required")]
    ReauthRequired,
    #[error("upstream call failed: {0}")]
    Upstream(String),
    #[error("internal server error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetails<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetails<'a> {
    code: &'a str,
    message: String,
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource: resource.into(),
        }
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::MissingSecret => (StatusCode::INTERNAL_SERVER_ERROR, "secret_missing"),
            ApiError::SignatureInvalid => (StatusCode::UNAUTHORIZED, "signature_invalid"),
            ApiError::MalformedPayload { .. } => (StatusCode::BAD_REQUEST, "malformed_payload"),
            ApiError::Validation { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::ReauthRequired => (StatusCode::UNAUTHORIZED, "reauth_required"),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            ApiError::MalformedPayload { message } | ApiError::Validation { message } => {
                message.clone()
            }
            ApiError::Upstream(message) => message.clone(),
            other => other.to_string(),
        };

        let mut response = Json(ErrorBody {
            error: ErrorDetails { code, message },
        })
        .into_response();
        *response.status_mut() = status;
        response
    }
}

impl From<SmartcarError> for ApiError {
    fn from(error: SmartcarError) -> Self {
        match error {
            SmartcarError::ReauthRequired | SmartcarError::MissingRefreshToken => {
                ApiError::ReauthRequired
            }
            SmartcarError::InvalidArgument(message) => ApiError::Validation { message },
            SmartcarError::Http(err) if err.is_timeout() => {
                ApiError::Upstream("request to smartcar timed out".to_string())
            }
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smartcar_errors_map_to_gateway_errors() {
        assert!(matches!(
            ApiError::from(SmartcarError::ReauthRequired),
            ApiError::ReauthRequired
        ));
        assert!(matches!(
            ApiError::from(SmartcarError::InvalidArgument("limit".into())),
            ApiError::Validation { .. }
        ));
        assert!(matches!(
            ApiError::from(SmartcarError::StatusUnavailable {
                vehicle_id: "v1".into()
            }),
            ApiError::Upstream(_)
        ));
    }

    #[test]
    fn status_codes_follow_the_error_kind() {
        assert_eq!(
            ApiError::SignatureInvalid.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::MissingSecret.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::not_found("vehicle v9").into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
