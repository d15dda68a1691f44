//! Error types for vibemonkey.

use thiserror::Error;

/// Failures talking to the generation API.
#[derive(Debug, Error)]
pub enum BrainError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("network error: {0}")]
    Network(String),

    /// Non-success status from the API, message passed through verbatim
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The API answered but the body had no usable text
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Failures on the page side of the bridge.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    #[error("page worker is not running")]
    Disconnected,

    #[error("reply {got} does not match request {expected}")]
    Mismatch { expected: String, got: String },

    #[error("{0}")]
    Browser(String),
}

/// Everything that can end a generation attempt. The display text is what the panel shows.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Please describe what you want to do.")]
    EmptyGoal,

    #[error("Error: API key not set. Please set it in the settings.")]
    MissingApiKey,

    #[error("Error: Could not find active tab.")]
    NoActiveTab,

    #[error("VibeMonkey cannot run on this special page ({url}).")]
    RestrictedPage { url: String },

    #[error("Error: Failed to read page context. {0}")]
    Page(#[from] PageError),

    #[error("Error: Failed to generate script. {0}")]
    Remote(#[from] BrainError),

    #[error("Error: Failed to generate script. Generated code is not a valid userscript.")]
    InvalidScript,
}

pub type Result<T> = std::result::Result<T, GenerateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_page_names_the_url() {
        let err = GenerateError::RestrictedPage {
            url: "chrome://settings/".into(),
        };
        assert_eq!(
            err.to_string(),
            "VibeMonkey cannot run on this special page (chrome://settings/)."
        );
    }

    #[test]
    fn test_remote_error_wraps_brain_message() {
        let err = GenerateError::from(BrainError::Api {
            status: 429,
            message: "quota exceeded".into(),
        });
        assert_eq!(
            err.to_string(),
            "Error: Failed to generate script. API error (429): quota exceeded"
        );
    }
}
