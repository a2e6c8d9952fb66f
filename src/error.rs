use std::time::Duration;

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum DubError {
    #[error("Invalid job input: {0}")]
    Validation(String),

    #[error("{provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Could not determine audio duration: {0}")]
    DurationComputation(String),

    #[error("Segment {segment_index} needs {ratio:.2}x speed-up, above the {ceiling:.1}x ceiling")]
    TimelineOverflow {
        segment_index: usize,
        ratio: f64,
        ceiling: f64,
    },

    #[error("stage timeout: {stage} exceeded {}s", timeout.as_secs())]
    StageTimeout { stage: String, timeout: Duration },

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl DubError {
    /// Shorthand for a failed external collaborator call.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        DubError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from an external collaborator (including its transport).
    pub fn is_provider(&self) -> bool {
        matches!(self, DubError::Provider { .. } | DubError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, DubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timeout_message() {
        let err = DubError::StageTimeout {
            stage: "translating".to_string(),
            timeout: Duration::from_secs(600),
        };
        assert_eq!(err.to_string(), "stage timeout: translating exceeded 600s");
    }

    #[test]
    fn test_provider_classification() {
        assert!(DubError::provider("Gemini", "quota").is_provider());
        assert!(!DubError::Validation("bad".to_string()).is_provider());
        assert!(!DubError::Cancelled.is_provider());
    }
}
