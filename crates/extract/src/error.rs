use thiserror::Error;

/// Why a single extraction attempt failed. Every variant is retried.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM response carried no content")]
    EmptyResponse,

    #[error("malformed structured output: {0}")]
    Malformed(String),

    #[error("invalid extraction payload: {0}")]
    Validation(String),
}
