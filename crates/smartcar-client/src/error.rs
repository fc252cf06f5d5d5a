use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmartcarError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url {0}")]
    Url(String),
    #[error("smartcar responded with status {status}: {message}")]
    Status { status: StatusCode, message: String },
    /// The refresh token was rejected or a retried call was still
    /// unauthorized; the owner must authorize the application again.
    #[error("smartcar authorization expired, re-authentication required")]
    ReauthRequired,
    #[error("no refresh token configured")]
    MissingRefreshToken,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no status endpoint answered for vehicle {vehicle_id}")]
    StatusUnavailable { vehicle_id: String },
}

impl SmartcarError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SmartcarError::Status { status, .. } => Some(*status),
            SmartcarError::Http(err) => err.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SmartcarError>;
