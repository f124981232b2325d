use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an image-model call failed, as inferred from its error text.
///
/// The model API reports failures as prose, so these categories come out of
/// a substring heuristic (see `services::interpret::classify_error_text`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    FeatureUnsupported,
    QuotaExceeded,
    AuthError,
    NetworkError,
    GenericError,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::FeatureUnsupported => "feature-unsupported",
            FailureCategory::QuotaExceeded => "quota-exceeded",
            FailureCategory::AuthError => "auth-error",
            FailureCategory::NetworkError => "network-error",
            FailureCategory::GenericError => "generic-error",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            FailureCategory::FeatureUnsupported => "MODEL_FEATURE_UNSUPPORTED",
            FailureCategory::QuotaExceeded => "MODEL_QUOTA_EXCEEDED",
            FailureCategory::AuthError => "MODEL_AUTH_ERROR",
            FailureCategory::NetworkError => "MODEL_NETWORK_ERROR",
            FailureCategory::GenericError => "MODEL_GENERIC_ERROR",
        }
    }

    /// Whether the caller may reasonably retry after this failure.
    /// Auth and feature-unsupported failures will not fix themselves.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            FailureCategory::QuotaExceeded
                | FailureCategory::NetworkError
                | FailureCategory::GenericError
        )
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors the pipeline raises itself. Model-call failures are NOT errors at
/// this level: the interpreter absorbs them into `GenerationOutcome::Fallback`
/// so a story run always finishes. What remains here is either a programmer
/// error (allocation, empty page text, malformed response object) or a model
/// failure that a caller explicitly asked to see as an error.
#[derive(Debug, Error)]
pub enum StorybookError {
    #[error("invalid character selection: {0}")]
    Allocation(String),

    #[error("page {page} has no text to illustrate")]
    EmptyPageText { page: u32 },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model failure ({category}): {message}")]
    Model {
        category: FailureCategory,
        message: String,
    },
}

impl StorybookError {
    pub fn code(&self) -> &'static str {
        match self {
            StorybookError::Allocation(_) => "ALLOCATION_ERROR",
            StorybookError::EmptyPageText { .. } | StorybookError::MalformedResponse(_) => {
                "PROMPT_ERROR"
            }
            StorybookError::Model { category, .. } => category.error_code(),
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            StorybookError::Model { category, .. } => category.retryable(),
            _ => false,
        }
    }
}
