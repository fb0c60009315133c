use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),

    #[error("scorer returned {got} scores for {expected} lines")]
    LengthMismatch { expected: usize, got: usize },
}

/// Failure of a single explanation call. Callers substitute the fallback text.
#[derive(Debug, Error)]
pub enum ExplanationError {
    #[error("explanation transport error: {0}")]
    Transport(String),

    #[error("explanation provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("explanation provider returned an empty response")]
    EmptyResponse,

    #[error("malformed explanation response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ExplanationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExplanationError::Malformed(e.to_string())
        } else {
            ExplanationError::Transport(e.to_string())
        }
    }
}
