//! Harness errors.

use oslayer_core::LayerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("layer error: {0}")]
    Layer(#[from] LayerError),

    /// A scenario observed a state its property forbids.
    #[error("{scenario}: invariant violated: {message}")]
    Invariant {
        scenario: &'static str,
        message: String,
    },
}

impl HarnessError {
    pub(crate) fn invariant(scenario: &'static str, message: impl Into<String>) -> Self {
        Self::Invariant {
            scenario,
            message: message.into(),
        }
    }
}
