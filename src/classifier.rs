use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::SafetyAnnotation;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("failed to fetch image {uri}: {reason}")]
    Resolution { uri: String, reason: String },
    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("classifier returned an error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("classifier returned no annotation for {0}")]
    MissingAnnotation(String),
    #[error("classifier call timed out")]
    Timeout,
}

/// Safe-search classification of a set of images. One call yields either an
/// annotation for every identifier or an error for the whole set.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        uris: &[String],
    ) -> Result<HashMap<String, SafetyAnnotation>, ClassifyError>;
}

/// General label detection for a single image.
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn labels(&self, uri: &str) -> Result<Vec<String>, ClassifyError>;
}
