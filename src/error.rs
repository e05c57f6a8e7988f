use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::cache::CacheError;
use crate::classifier::ClassifyError;

pub const EMPTY_URI_LIST: &str = "ImgUriList cannot be empty";
pub const BLANK_URI: &str = "ImgUriList cannot contain empty URIs";

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("failed to fetch image {uri}: {reason}")]
    ResolutionFailed { uri: String, reason: String },
    #[error("classification failed: {0}")]
    ClassificationFailed(String),
    #[error("request canceled")]
    Canceled,
    #[error(transparent)]
    Store(#[from] CacheError),
}

impl From<ClassifyError> for FilterError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::Resolution { uri, reason } => Self::ResolutionFailed { uri, reason },
            other => Self::ClassificationFailed(other.to_string()),
        }
    }
}

impl FilterError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ResolutionFailed { .. } | Self::ClassificationFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FilterError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_keep_their_uri() {
        let err = FilterError::from(ClassifyError::Resolution {
            uri: "https://example.com/x.jpg".to_string(),
            reason: "status 404 Not Found".to_string(),
        });
        assert!(matches!(
            err,
            FilterError::ResolutionFailed { ref uri, .. } if uri == "https://example.com/x.jpg"
        ));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn classifier_errors_become_classification_failed() {
        let err = FilterError::from(ClassifyError::Timeout);
        assert!(matches!(err, FilterError::ClassificationFailed(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn invalid_request_renders_message_verbatim() {
        let err = FilterError::InvalidRequest(EMPTY_URI_LIST.to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "ImgUriList cannot be empty");
    }
}
